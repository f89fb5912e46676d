//! IPTC-IIM records inside a Photoshop 3.0 (APP13) segment.

pub(super) const PHOTOSHOP_HEADER: &[u8] = b"Photoshop 3.0\0";
const RESOURCE_SIGNATURE: &[u8] = b"8BIM";
const IPTC_RESOURCE_ID: u16 = 0x0404;

const TAG_MARKER: u8 = 0x1C;
const DS_CODED_CHARSET: (u8, u8) = (1, 90);
const DS_RECORD_VERSION: (u8, u8) = (2, 0);
const DS_OBJECT_NAME: (u8, u8) = (2, 5);
const DS_KEYWORDS: (u8, u8) = (2, 25);
const DS_CAPTION: (u8, u8) = (2, 120);

const MAX_OBJECT_NAME: usize = 64;
const MAX_KEYWORD: usize = 64;
const MAX_CAPTION: usize = 2000;

/// ESC % G declares UTF-8 for the record 2 strings.
const UTF8_MARKER: &[u8] = &[0x1B, 0x25, 0x47];

/// IPTC fields this crate reads and writes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(super) struct IptcFields {
    pub object_name: Option<String>,
    pub caption: Option<String>,
    pub keywords: Vec<String>,
}

/// One 8BIM image resource: id plus the full encoded bytes (header, name,
/// payload, padding) and the payload slice.
struct Resource<'a> {
    id: u16,
    raw: &'a [u8],
    payload: &'a [u8],
}

/// Walk the 8BIM resources following the Photoshop header. Stops at the
/// first malformed entry.
fn resources(segment: &[u8]) -> Vec<Resource<'_>> {
    let mut out = Vec::new();
    if !segment.starts_with(PHOTOSHOP_HEADER) {
        return out;
    }
    let mut pos = PHOTOSHOP_HEADER.len();
    while pos + 12 <= segment.len() && &segment[pos..pos + 4] == RESOURCE_SIGNATURE {
        let id = u16::from_be_bytes([segment[pos + 4], segment[pos + 5]]);
        // Pascal name: length byte + bytes, padded to an even total.
        let name_len = segment[pos + 6] as usize;
        let name_total = (name_len + 1 + 1) & !1;
        let size_at = pos + 6 + name_total;
        if size_at + 4 > segment.len() {
            break;
        }
        let size = u32::from_be_bytes([
            segment[size_at],
            segment[size_at + 1],
            segment[size_at + 2],
            segment[size_at + 3],
        ]) as usize;
        let data_start = size_at + 4;
        let data_end = data_start + size;
        if data_end > segment.len() {
            break;
        }
        let padded_end = (data_end + (size & 1)).min(segment.len());
        out.push(Resource {
            id,
            raw: &segment[pos..padded_end],
            payload: &segment[data_start..data_end],
        });
        pos = padded_end;
    }
    out
}

/// Longest prefix of `s` no longer than `max` bytes that ends on a char
/// boundary.
fn clip(s: &str, max: usize) -> &[u8] {
    if s.len() <= max {
        return s.as_bytes();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s.as_bytes()[..end]
}

fn push_dataset(out: &mut Vec<u8>, (record, dataset): (u8, u8), value: &[u8]) {
    out.extend_from_slice(&[TAG_MARKER, record, dataset]);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
}

fn encode_records(fields: &IptcFields) -> Vec<u8> {
    let mut iim = Vec::new();
    push_dataset(&mut iim, DS_CODED_CHARSET, UTF8_MARKER);
    push_dataset(&mut iim, DS_RECORD_VERSION, &4u16.to_be_bytes());
    if let Some(name) = &fields.object_name {
        push_dataset(&mut iim, DS_OBJECT_NAME, clip(name, MAX_OBJECT_NAME));
    }
    for keyword in &fields.keywords {
        push_dataset(&mut iim, DS_KEYWORDS, clip(keyword, MAX_KEYWORD));
    }
    if let Some(caption) = &fields.caption {
        push_dataset(&mut iim, DS_CAPTION, clip(caption, MAX_CAPTION));
    }
    iim
}

/// Build APP13 contents carrying `fields`, keeping every non-IPTC resource
/// of `existing` (thumbnails, resolution info and so on).
pub(super) fn build_segment(existing: Option<&[u8]>, fields: &IptcFields) -> Vec<u8> {
    let mut out = PHOTOSHOP_HEADER.to_vec();

    if let Some(existing) = existing {
        for resource in resources(existing) {
            if resource.id != IPTC_RESOURCE_ID {
                out.extend_from_slice(resource.raw);
            }
        }
    }

    let iim = encode_records(fields);
    out.extend_from_slice(RESOURCE_SIGNATURE);
    out.extend_from_slice(&IPTC_RESOURCE_ID.to_be_bytes());
    out.extend_from_slice(&[0, 0]); // empty name, padded
    out.extend_from_slice(&(iim.len() as u32).to_be_bytes());
    out.extend_from_slice(&iim);
    if iim.len() % 2 != 0 {
        out.push(0);
    }
    out
}

/// Read the fields back out of APP13 contents.
pub(super) fn parse_segment(segment: &[u8]) -> IptcFields {
    let mut fields = IptcFields::default();
    let Some(iim) = resources(segment)
        .into_iter()
        .find(|r| r.id == IPTC_RESOURCE_ID)
        .map(|r| r.payload)
    else {
        return fields;
    };

    let mut pos = 0;
    while pos + 5 <= iim.len() && iim[pos] == TAG_MARKER {
        let key = (iim[pos + 1], iim[pos + 2]);
        let len = u16::from_be_bytes([iim[pos + 3], iim[pos + 4]]) as usize;
        // Extended-length datasets (high bit set) are not used for text.
        if len & 0x8000 != 0 {
            break;
        }
        let start = pos + 5;
        let end = start + len;
        if end > iim.len() {
            break;
        }
        let value = String::from_utf8_lossy(&iim[start..end]).into_owned();
        match key {
            DS_OBJECT_NAME => fields.object_name = Some(value),
            DS_CAPTION => fields.caption = Some(value),
            DS_KEYWORDS => fields.keywords.push(value),
            _ => {}
        }
        pos = end;
    }
    fields
}
