//! Provenance parsing for image storage paths.
//!
//! Upload paths follow `.../patients/<NAME>_<hexid>/<file>`, where NAME
//! is the patient name with underscores for spaces and hexid is the 8-
//! or 24-hex source-system id. The object store is immutable, so the
//! encoded name is authoritative evidence of which patient an image was
//! captured for.

/// Extract the patient name encoded in an image URL, if the path follows
/// the provenance convention. Percent-encoding is decoded first.
pub fn provenance_name(url: &str) -> Option<String> {
    let decoded = percent_decode(url);
    let folder = decoded
        .split('/')
        .skip_while(|segment| *segment != "patients")
        .nth(1)?;

    // Split off the trailing _<hexid> suffix (8 to 24 hex chars)
    let (name_part, id_part) = folder.rsplit_once('_')?;
    let id_len = id_part.len();
    if !(8..=24).contains(&id_len) || !id_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    if name_part.is_empty() {
        return None;
    }

    Some(name_part.replace('_', " "))
}

/// Minimal percent-decoding; invalid sequences pass through unchanged.
/// Works on raw bytes so a `%` next to a multi-byte character cannot
/// split a code point.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_long_id_suffix() {
        let url = "https://store.example.com/acct/patients/MARIA_SILVA_697001ce4e429636ed944c10/img-1.jpg";
        assert_eq!(provenance_name(url), Some("MARIA SILVA".into()));
    }

    #[test]
    fn test_parses_short_id_suffix() {
        let url = "https://store.example.com/acct/patients/JOAO_PEREIRA_ab12cd34/img-2.jpg";
        assert_eq!(provenance_name(url), Some("JOAO PEREIRA".into()));
    }

    #[test]
    fn test_percent_encoded_folder() {
        let url = "https://store.example.com/acct/patients/JOS%C3%89_COSTA_ab12cd34/img.jpg";
        assert_eq!(provenance_name(url), Some("JOSÉ COSTA".into()));
    }

    #[test]
    fn test_percent_before_multibyte_char() {
        // A stray % directly before a multi-byte character must pass
        // through undecoded, not split the code point.
        let url = "https://store.example.com/acct/patients/MARIA%中SILVA_ab12cd34/img.jpg";
        assert_eq!(provenance_name(url), Some("MARIA%中SILVA".into()));
    }

    #[test]
    fn test_invalid_percent_sequence_passes_through() {
        let url = "https://store.example.com/acct/patients/MARIA%ZZSILVA_ab12cd34/img.jpg";
        assert_eq!(provenance_name(url), Some("MARIA%ZZSILVA".into()));
    }

    #[test]
    fn test_no_patients_segment() {
        assert_eq!(provenance_name("https://store.example.com/misc/img.jpg"), None);
    }

    #[test]
    fn test_suffix_not_hex() {
        let url = "https://store.example.com/acct/patients/MARIA_SILVA/img.jpg";
        assert_eq!(provenance_name(url), None);
    }

    #[test]
    fn test_suffix_wrong_length() {
        // 6 hex chars is below the shortest id format
        let url = "https://store.example.com/acct/patients/MARIA_ab12cd/img.jpg";
        assert_eq!(provenance_name(url), None);
    }
}
