// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the managed namespace view

#[cfg(test)]
mod tests {
    use super::super::{
        format_rfc3339, glob_to_regex, is_forbidden, parse_rfc3339, FailingResource,
        ManagedNamespace, NamespaceStatus, OwnerAddress,
    };
    use crate::annotations;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;

    fn kube_namespace(name: &str, object_annotations: BTreeMap<String, String>) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                creation_timestamp: Some(Time(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())),
                annotations: Some(object_annotations),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    // ========================================================================
    // Status Tests
    // ========================================================================

    #[test]
    fn test_status_round_trips_through_annotation_values() {
        for status in [
            NamespaceStatus::Ok,
            NamespaceStatus::Unstable,
            NamespaceStatus::Failing,
            NamespaceStatus::Failed,
            NamespaceStatus::Stale,
            NamespaceStatus::Terminating,
        ] {
            assert_eq!(
                NamespaceStatus::parse(status.as_str()),
                Some(status),
                "'{status}' should round-trip"
            );
        }
        assert_eq!(NamespaceStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(NamespaceStatus::Failed.is_terminal());
        assert!(NamespaceStatus::Stale.is_terminal());
        assert!(NamespaceStatus::Terminating.is_terminal());
        assert!(!NamespaceStatus::Ok.is_terminal());
        assert!(!NamespaceStatus::Unstable.is_terminal());
        assert!(!NamespaceStatus::Failing.is_terminal());
    }

    // ========================================================================
    // Owner Address Tests
    // ========================================================================

    #[test]
    fn test_owner_address_round_trip() {
        let address = OwnerAddress {
            name: "Grace Hopper".to_string(),
            slack_id: "U0123ABCD".to_string(),
        };

        let decoded = OwnerAddress::decode(&address.encode()).expect("round trip");
        assert_eq!(decoded, address);
    }

    #[test]
    fn test_owner_address_rejects_garbage() {
        assert_eq!(OwnerAddress::decode(""), None);
        assert_eq!(OwnerAddress::decode("not-base64!!"), None);

        // Valid base64 but no separator
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
        let no_separator = BASE64.encode("just-a-name");
        assert_eq!(OwnerAddress::decode(&no_separator), None);

        let empty_id = BASE64.encode("name::");
        assert_eq!(
            OwnerAddress::decode(&empty_id),
            None,
            "An empty slack id is not a deliverable address"
        );
    }

    // ========================================================================
    // Annotation Parsing Tests
    // ========================================================================

    #[test]
    fn test_from_kube_parses_manager_annotations() {
        let since = Utc.with_ymd_and_hms(2025, 3, 1, 13, 0, 0).unwrap();
        let mut object_annotations = BTreeMap::new();
        object_annotations.insert(annotations::STATUS.to_string(), "failing".to_string());
        object_annotations.insert(
            annotations::STATUS_SINCE.to_string(),
            format_rfc3339(since),
        );
        object_annotations.insert(
            annotations::FAILING_RESOURCES.to_string(),
            r#"[{"kind":"Pod","name":"web-0","reason":"CrashLoopBackOff","message":"m","first_seen":"2025-03-01T13:00:00Z"}]"#.to_string(),
        );
        object_annotations.insert(
            annotations::NOTIFIED_FOR.to_string(),
            r#"["failing"]"#.to_string(),
        );

        let ns = ManagedNamespace::from_kube(&kube_namespace("ci-a", object_annotations))
            .expect("valid namespace");

        assert_eq!(ns.name, "ci-a");
        assert_eq!(ns.status, Some(NamespaceStatus::Failing));
        assert_eq!(ns.status_since, Some(since));
        assert_eq!(ns.failing_resources.len(), 1);
        assert_eq!(ns.failing_resources[0].name, "web-0");
        assert!(ns.notified_for.contains(&NamespaceStatus::Failing));
    }

    #[test]
    fn test_from_kube_tolerates_missing_and_corrupt_annotations() {
        let mut object_annotations = BTreeMap::new();
        object_annotations.insert(
            annotations::FAILING_RESOURCES.to_string(),
            "not json".to_string(),
        );
        object_annotations.insert(annotations::STATUS.to_string(), "bogus".to_string());

        let ns = ManagedNamespace::from_kube(&kube_namespace("ci-a", object_annotations))
            .expect("valid namespace");

        assert_eq!(ns.status, None);
        assert!(ns.failing_resources.is_empty());
        assert!(ns.notified_for.is_empty());
    }

    #[test]
    fn test_status_annotations_serialize_compact_json() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 14, 0, 0).unwrap();
        let mut ns = ManagedNamespace::from_kube(&kube_namespace("ci-a", BTreeMap::new()))
            .expect("valid namespace");
        ns.status = Some(NamespaceStatus::Failing);
        ns.status_since = Some(now);
        ns.failing_resources = vec![FailingResource {
            kind: "Pod".to_string(),
            name: "web-0".to_string(),
            reason: "CrashLoopBackOff".to_string(),
            message: "m".to_string(),
            first_seen: now,
        }];
        ns.notified_for.insert(NamespaceStatus::Failing);

        let out = ns.status_annotations();

        assert_eq!(out.get(annotations::STATUS).map(String::as_str), Some("failing"));
        assert_eq!(
            out.get(annotations::STATUS_SINCE).map(String::as_str),
            Some("2025-03-01T14:00:00Z")
        );
        let failing = out.get(annotations::FAILING_RESOURCES).unwrap();
        assert!(
            !failing.contains('\n') && !failing.contains(": "),
            "Structured annotation values must be compact JSON"
        );
        assert_eq!(
            out.get(annotations::NOTIFIED_FOR).map(String::as_str),
            Some(r#"["failing"]"#)
        );
    }

    #[test]
    fn test_timestamp_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 15, 9, 30, 0).unwrap();
        assert_eq!(parse_rfc3339(&format_rfc3339(ts)), Some(ts));
        assert_eq!(parse_rfc3339("garbage"), None);

        // Foreign offsets normalize to UTC
        assert_eq!(
            parse_rfc3339("2025-06-15T11:30:00+02:00"),
            Some(ts),
            "Offsets should normalize to UTC"
        );
    }

    // ========================================================================
    // Glob Tests
    // ========================================================================

    #[test]
    fn test_glob_star_and_question_mark() {
        let glob = glob_to_regex("ci-*").unwrap();
        assert!(glob.is_match("ci-abc"));
        assert!(glob.is_match("ci-"));
        assert!(!glob.is_match("prod-ci-abc"), "Globs are anchored");

        let single = glob_to_regex("ci-?").unwrap();
        assert!(single.is_match("ci-a"));
        assert!(!single.is_match("ci-ab"));
    }

    #[test]
    fn test_glob_character_class() {
        let glob = glob_to_regex("ci-[ab]*").unwrap();
        assert!(glob.is_match("ci-a1"));
        assert!(glob.is_match("ci-b"));
        assert!(!glob.is_match("ci-c1"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let glob = glob_to_regex("ci.team-*").unwrap();
        assert!(glob.is_match("ci.team-a"));
        assert!(!glob.is_match("ciXteam-a"), "Dots must match literally");
    }

    #[test]
    fn test_glob_unterminated_class_is_an_error() {
        assert!(glob_to_regex("ci-[ab").is_err());
    }

    // ========================================================================
    // Forbidden Namespaces
    // ========================================================================

    #[test]
    fn test_forbidden_namespaces() {
        for name in ["kube-system", "kube-public", "kube-node-lease", "default"] {
            assert!(is_forbidden(name), "'{name}' must never be managed");
        }
        assert!(!is_forbidden("ci-abc"));
    }
}
