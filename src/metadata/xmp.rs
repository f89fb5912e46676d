//! XMP packet editing for the descriptive Dublin Core / Photoshop fields.
//!
//! The packet is handled as text: our elements are removed wherever they
//! appear and re-inserted before the closing `</rdf:Description>`. Anything
//! else in an existing packet is left alone.

pub(super) const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

const NS_DC: &str = "xmlns:dc=\"http://purl.org/dc/elements/1.1/\"";
const NS_PHOTOSHOP: &str = "xmlns:photoshop=\"http://ns.adobe.com/photoshop/1.0/\"";
const ABOUT_ATTR: &str = "rdf:about=\"\"";
const DESCRIPTION_CLOSE: &str = "</rdf:Description>";

const OWNED_ELEMENTS: &[&str] = &["dc:title", "dc:description", "dc:subject", "photoshop:Headline"];

/// XMP fields this crate reads and writes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(super) struct XmpFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
}

fn empty_packet() -> String {
    format!(
        "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n\
         <x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n\
         <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n\
         <rdf:Description {ABOUT_ATTR}\n  {NS_DC}\n  {NS_PHOTOSHOP}>\n\
         {DESCRIPTION_CLOSE}\n\
         </rdf:RDF>\n\
         </x:xmpmeta>\n\
         <?xpacket end=\"w\"?>"
    )
}

fn render_elements(title: &str, keywords: &[String]) -> String {
    let t = xml_escape(title);
    let mut out = String::new();
    out.push_str(&format!(
        "  <dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">{t}</rdf:li></rdf:Alt></dc:title>\n"
    ));
    out.push_str(&format!(
        "  <dc:description><rdf:Alt><rdf:li xml:lang=\"x-default\">{t}</rdf:li></rdf:Alt></dc:description>\n"
    ));
    out.push_str(&format!("  <photoshop:Headline>{t}</photoshop:Headline>\n"));
    out.push_str("  <dc:subject><rdf:Bag>\n");
    for keyword in keywords {
        out.push_str(&format!("    <rdf:li>{}</rdf:li>\n", xml_escape(keyword)));
    }
    out.push_str("  </rdf:Bag></dc:subject>\n");
    out
}

/// Produce a packet with title, description and keywords set, starting from
/// `existing` when there is one.
pub(super) fn update_packet(existing: Option<&str>, title: &str, keywords: &[String]) -> String {
    let mut packet = match existing {
        Some(xmp) if xmp.contains("<rdf:Description") => xmp.to_string(),
        _ => empty_packet(),
    };

    open_self_closing_description(&mut packet);

    for ns in [NS_DC, NS_PHOTOSHOP] {
        let prefix = &ns[..ns.find('=').unwrap_or(ns.len())];
        if !packet.contains(prefix) {
            if let Some(pos) = packet.find(ABOUT_ATTR) {
                packet.insert_str(pos + ABOUT_ATTR.len(), &format!("\n  {ns}"));
            }
        }
    }

    for element in OWNED_ELEMENTS {
        remove_element(&mut packet, element);
    }

    match packet.find(DESCRIPTION_CLOSE) {
        Some(pos) => packet.insert_str(pos, &render_elements(title, keywords)),
        None => {
            // Nothing we can anchor to; start over.
            packet = empty_packet();
            if let Some(pos) = packet.find(DESCRIPTION_CLOSE) {
                packet.insert_str(pos, &render_elements(title, keywords));
            }
        }
    }
    packet
}

/// Turn `<rdf:Description .../>` into an open/close pair.
fn open_self_closing_description(packet: &mut String) {
    if packet.contains(DESCRIPTION_CLOSE) {
        return;
    }
    let Some(start) = packet.find("<rdf:Description") else {
        return;
    };
    let Some(rel_end) = packet[start..].find('>') else {
        return;
    };
    let end = start + rel_end;
    if end > 0 && packet.as_bytes()[end - 1] == b'/' {
        packet.replace_range(end - 1..=end, &format!(">\n{DESCRIPTION_CLOSE}"));
    }
}

/// Remove every `<tag ...>...</tag>` occurrence (and a trailing newline).
fn remove_element(xml: &mut String, tag: &str) {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut search_from = 0;
    while let Some(rel) = xml[search_from..].find(&open) {
        let start = search_from + rel;
        // `<dc:title` must not match `<dc:titles`.
        let next = xml.as_bytes().get(start + open.len()).copied();
        if !matches!(next, Some(b'>') | Some(b' ') | Some(b'\n') | Some(b'\t') | Some(b'/')) {
            search_from = start + open.len();
            continue;
        }
        let Some(rel_close) = xml[start..].find(&close) else {
            break;
        };
        let mut end = start + rel_close + close.len();
        if xml.as_bytes().get(end) == Some(&b'\n') {
            end += 1;
        }
        xml.replace_range(start..end, "");
        search_from = start;
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Inner text of the first `<tag>` element, if any.
fn element_body<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let start = xml.find(&open)?;
    let body_start = start + xml[start..].find('>')? + 1;
    let body_end = body_start + xml[body_start..].find(&close)?;
    Some(&xml[body_start..body_end])
}

/// Text of every `<rdf:li>` inside `body`.
fn list_items(body: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("<rdf:li") {
        let Some(gt) = rest[start..].find('>') else {
            break;
        };
        let text_start = start + gt + 1;
        let Some(len) = rest[text_start..].find("</rdf:li>") else {
            break;
        };
        items.push(xml_unescape(&rest[text_start..text_start + len]));
        rest = &rest[text_start + len..];
    }
    items
}

pub(super) fn parse_packet(xmp: &str) -> XmpFields {
    let first_item = |tag: &str| {
        element_body(xmp, tag).and_then(|body| list_items(body).into_iter().next())
    };
    XmpFields {
        title: first_item("dc:title"),
        description: first_item("dc:description"),
        keywords: element_body(xmp, "dc:subject")
            .map(list_items)
            .unwrap_or_default(),
    }
}
