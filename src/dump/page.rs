use quick_xml::events::Event;

use super::ElementStack;

/// One `<page>` block of the dump, reduced to the fields the filter looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    /// Line of the `<page>` marker.
    pub start_line: u64,
    /// Line of the `</page>` marker.
    pub end_line: u64,
    pub title: Option<String>,
    pub namespace: Option<i32>,
    pub id: Option<u64>,
}

/// Parse an accumulated `<page>...</page>` fragment.
pub(crate) fn parse_page(xml: &str, start_line: u64, end_line: u64) -> Result<PageRecord, String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut stack = ElementStack::default();
    let mut text = String::new();

    let mut title = None;
    let mut namespace = None;
    let mut id = None;
    let mut closed = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if closed {
                    return Err("content after </page>".into());
                }
                if stack.depth() == 0 && e.name().as_ref() != b"page" {
                    return Err("expected <page>".into());
                }
                stack.push(e.name().as_ref());
                text.clear();
            }
            Ok(Event::Text(e)) => {
                if stack.depth() == 2 {
                    let unescaped = e.unescape().map_err(|e| e.to_string())?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(e)) => {
                if stack.depth() == 2 {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(_)) => {
                if stack.at(&[b"page", b"title"]) {
                    title = Some(text.trim().to_string());
                } else if stack.at(&[b"page", b"ns"]) {
                    let raw = text.trim();
                    namespace = Some(
                        raw.parse::<i32>()
                            .map_err(|_| format!("bad <ns> value {:?}", raw))?,
                    );
                } else if stack.at(&[b"page", b"id"]) {
                    id = text.trim().parse().ok();
                }
                stack.pop();
                text.clear();
                if stack.depth() == 0 {
                    closed = true;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    if !closed || stack.depth() != 0 {
        return Err("unclosed element in page".into());
    }

    Ok(PageRecord {
        start_line,
        end_line,
        title,
        namespace,
        id,
    })
}
