/// Make a display name safe to use as a file name.
///
/// Spaces and characters rejected by common filesystems become `_`;
/// apostrophes are dropped ("Bob’s Keys" -> "Bobs_Keys").
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .filter_map(|c| match c {
            '\'' | '\u{2019}' => None,
            ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => Some('_'),
            c if c.is_control() => Some('_'),
            c => Some(c),
        })
        .collect()
}

/// Log file name for an entity, falling back to its identifier when the
/// display name normalizes to nothing.
pub fn log_file_name(name: &str, entity_id: &str) -> String {
    let mut stem = normalize_name(name);
    if stem.is_empty() {
        stem = normalize_name(entity_id);
    }
    if stem.is_empty() {
        stem = "unnamed".to_string();
    }
    format!("{}.csv", stem)
}

/// Log file name carrying the identifier, used when the plain name is
/// already claimed by another entity.
pub fn disambiguated_file_name(name: &str, entity_id: &str) -> String {
    let stem = normalize_name(name);
    let id = normalize_name(entity_id);
    if stem.is_empty() {
        return log_file_name(name, entity_id);
    }
    format!("{}_{}.csv", stem, id)
}

/// Identifier-tagged file name with a counter, for when even the tagged
/// name is taken (e.g. another device is literally named "<name>_<id>").
pub fn numbered_file_name(name: &str, entity_id: &str, counter: u32) -> String {
    let tagged = disambiguated_file_name(name, entity_id);
    let stem = tagged.strip_suffix(".csv").unwrap_or(&tagged);
    format!("{}_{}.csv", stem, counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spaces_become_underscores() {
        assert_eq!(normalize_name("My Keys"), "My_Keys");
    }

    #[test]
    fn test_apostrophes_removed() {
        assert_eq!(normalize_name("Bob\u{2019}s Keys"), "Bobs_Keys");
        assert_eq!(normalize_name("Bob's Bag"), "Bobs_Bag");
    }

    #[test]
    fn test_path_separators_replaced() {
        assert_eq!(normalize_name("../etc/passwd"), ".._etc_passwd");
        assert_eq!(normalize_name("a\\b:c*d?e\"f<g>h|i"), "a_b_c_d_e_f_g_h_i");
    }

    #[test]
    fn test_unicode_names_kept() {
        assert_eq!(normalize_name("Schlüssel"), "Schlüssel");
    }

    #[test]
    fn test_log_file_name() {
        assert_eq!(log_file_name("Keys", "A"), "Keys.csv");
        assert_eq!(log_file_name("", "ABC-123"), "ABC-123.csv");
        assert_eq!(log_file_name("  ", ""), "unnamed.csv");
    }

    #[test]
    fn test_disambiguated_file_name() {
        assert_eq!(disambiguated_file_name("My Keys", "A/1"), "My_Keys_A_1.csv");
    }

    #[test]
    fn test_numbered_file_name() {
        assert_eq!(numbered_file_name("Keys", "Y", 2), "Keys_Y_2.csv");
        assert_eq!(numbered_file_name("", "ABC", 3), "ABC_3.csv");
    }
}
