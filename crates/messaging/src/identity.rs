use uuid::Uuid;

/// Domain used for consumer groups when none is configured.
pub const DEFAULT_GROUP_DOMAIN: &str = "sdk";

/// Generates a new correlation id.
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Composes a consumer group id.
///
/// The result is `domain`, followed by `-suffix` when a suffix is given, and
/// by `-<uuid>` when `require_unique` is set. A unique group receives every
/// message on its topics; a shared group splits them between its members.
#[must_use]
pub fn generate_group_id(domain: &str, suffix: &str, require_unique: bool) -> String {
    let mut group_id = domain.to_string();

    if !suffix.is_empty() {
        group_id.push('-');
        group_id.push_str(&to_id_format(suffix));
    }

    if require_unique {
        group_id.push('-');
        group_id.push_str(&generate_id());
    }

    group_id
}

fn to_id_format(text: &str) -> String {
    text.replace(' ', "-").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_unique() {
        let ids: std::collections::HashSet<String> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_shared_group_is_stable() {
        assert_eq!(
            generate_group_id("sdk", "Adapter Group Service", false),
            "sdk-adapter-group-service"
        );
        assert_eq!(generate_group_id("sdk", "", false), "sdk");
    }

    #[test]
    fn test_unique_group_gets_fresh_suffix() {
        let first = generate_group_id("sdk", "nlu", true);
        let second = generate_group_id("sdk", "nlu", true);

        assert!(first.starts_with("sdk-nlu-"));
        assert_ne!(first, second);

        let suffix = first.trim_start_matches("sdk-nlu-");
        assert!(Uuid::parse_str(suffix).is_ok());
    }
}
