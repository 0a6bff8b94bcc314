use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};

use super::ElementStack;

/// Dump-wide metadata from the `<siteinfo>` block.
#[derive(Debug, Clone, Default)]
pub struct SiteInfo {
    pub site_name: Option<String>,
    pub base: Option<String>,
    pub generator: String,
    pub case: Option<String>,
    /// Namespace key → name. The main namespace maps to an empty name.
    pub namespaces: BTreeMap<i32, String>,
}

impl SiteInfo {
    pub fn namespace_name(&self, key: i32) -> Option<&str> {
        self.namespaces.get(&key).map(|s| s.as_str())
    }
}

/// Parse an accumulated `<siteinfo>...</siteinfo>` fragment.
pub(crate) fn parse_site_info(xml: &str) -> Result<SiteInfo, String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut stack = ElementStack::default();

    let mut site_name = None;
    let mut base = None;
    let mut generator = None;
    let mut case = None;
    let mut namespaces: Option<BTreeMap<i32, String>> = None;
    let mut current_ns: Option<i32> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if stack.depth() == 0 && e.name().as_ref() != b"siteinfo" {
                    return Err("expected <siteinfo>".into());
                }
                stack.push(e.name().as_ref());
                text.clear();
                if stack.at(&[b"siteinfo", b"namespaces"]) {
                    namespaces.get_or_insert_with(BTreeMap::new);
                } else if stack.at(&[b"siteinfo", b"namespaces", b"namespace"]) {
                    current_ns = Some(namespace_key(&e)?);
                }
            }
            Ok(Event::Empty(e)) => {
                if stack.at(&[b"siteinfo", b"namespaces"]) && e.name().as_ref() == b"namespace" {
                    let key = namespace_key(&e)?;
                    namespaces.get_or_insert_with(BTreeMap::new).insert(key, String::new());
                } else if stack.at(&[b"siteinfo"]) && e.name().as_ref() == b"namespaces" {
                    namespaces.get_or_insert_with(BTreeMap::new);
                }
            }
            Ok(Event::Text(e)) => {
                let unescaped = e.unescape().map_err(|e| e.to_string())?;
                text.push_str(&unescaped);
            }
            Ok(Event::End(_)) => {
                let value = text.trim().to_string();
                if stack.at(&[b"siteinfo", b"sitename"]) {
                    site_name = Some(value);
                } else if stack.at(&[b"siteinfo", b"base"]) {
                    base = Some(value);
                } else if stack.at(&[b"siteinfo", b"generator"]) {
                    generator = Some(value);
                } else if stack.at(&[b"siteinfo", b"case"]) {
                    case = Some(value);
                } else if stack.at(&[b"siteinfo", b"namespaces", b"namespace"]) {
                    if let (Some(key), Some(map)) = (current_ns.take(), namespaces.as_mut()) {
                        map.insert(key, value);
                    }
                }
                text.clear();
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    if stack.depth() != 0 {
        return Err("unclosed element in siteinfo".into());
    }
    let namespaces = match namespaces {
        Some(map) if !map.is_empty() => map,
        _ => return Err("no namespaces defined".into()),
    };
    let generator = generator.ok_or_else(|| "no siteinfo generator".to_string())?;

    Ok(SiteInfo {
        site_name,
        base,
        generator,
        case,
        namespaces,
    })
}

fn namespace_key(e: &BytesStart) -> Result<i32, String> {
    let attr = e
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == b"key")
        .ok_or_else(|| "namespace without key".to_string())?;
    let raw = String::from_utf8_lossy(&attr.value);
    raw.trim()
        .parse()
        .map_err(|_| format!("bad namespace key {:?}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITEINFO: &str = r#"<siteinfo>
    <sitename>Wikipedia</sitename>
    <dbname>enwiki</dbname>
    <base>https://en.wikipedia.org/wiki/Main_Page</base>
    <generator>MediaWiki 1.42.0-wmf.5</generator>
    <case>first-letter</case>
    <namespaces>
      <namespace key="-2" case="first-letter">Media</namespace>
      <namespace key="0" case="first-letter" />
      <namespace key="6" case="first-letter">File</namespace>
      <namespace key="14" case="first-letter">Category</namespace>
    </namespaces>
  </siteinfo>"#;

    #[test]
    fn full_block() {
        let site = parse_site_info(SITEINFO).unwrap();
        assert_eq!(site.site_name.as_deref(), Some("Wikipedia"));
        assert_eq!(site.generator, "MediaWiki 1.42.0-wmf.5");
        assert_eq!(site.case.as_deref(), Some("first-letter"));
        assert_eq!(site.namespaces.len(), 4);
        assert_eq!(site.namespace_name(6), Some("File"));
        assert_eq!(site.namespace_name(0), Some(""));
        assert_eq!(site.namespace_name(-2), Some("Media"));
        assert_eq!(site.namespace_name(2), None);
    }

    #[test]
    fn missing_namespaces() {
        let xml = "<siteinfo><generator>MediaWiki</generator></siteinfo>";
        let err = parse_site_info(xml).unwrap_err();
        assert!(err.contains("namespaces"), "{}", err);
    }

    #[test]
    fn empty_namespaces() {
        let xml = "<siteinfo><generator>MediaWiki</generator><namespaces /></siteinfo>";
        assert!(parse_site_info(xml).is_err());
    }

    #[test]
    fn missing_generator() {
        let xml = r#"<siteinfo><namespaces><namespace key="6">File</namespace></namespaces></siteinfo>"#;
        let err = parse_site_info(xml).unwrap_err();
        assert!(err.contains("generator"), "{}", err);
    }

    #[test]
    fn wrong_root() {
        assert!(parse_site_info("<page></page>").is_err());
    }

    #[test]
    fn escaped_names() {
        let xml = r#"<siteinfo><generator>MW</generator><namespaces><namespace key="4">Tom &amp; Jerry</namespace></namespaces></siteinfo>"#;
        let site = parse_site_info(xml).unwrap();
        assert_eq!(site.namespace_name(4), Some("Tom & Jerry"));
    }
}
