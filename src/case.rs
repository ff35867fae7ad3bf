//! Case conversion for relation names: include names are PascalCase ("SessionType"), JSON fields snake_case.

/// Convert a single identifier from PascalCase or camelCase to snake_case.
/// e.g. "SessionType" -> "session_type", "timeSlot" -> "time_slot"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::to_snake_case;

    #[test]
    fn pascal_case_relation_names() {
        assert_eq!(to_snake_case("SessionType"), "session_type");
        assert_eq!(to_snake_case("Level"), "level");
        assert_eq!(to_snake_case("timeSlot"), "time_slot");
    }

    #[test]
    fn already_snake_case_is_unchanged() {
        assert_eq!(to_snake_case("location"), "location");
        assert_eq!(to_snake_case("time_slot"), "time_slot");
    }
}
