// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for cron parsing and child drift detection

#[cfg(test)]
mod tests {
    use super::super::{cron_job_differs, next_tick, parse_cron};
    use crate::config::{Config, TaskSettings};
    use crate::tasks::{build_cron_job, TaskKind};
    use chrono::{TimeZone, Utc};

    fn context() -> crate::config::ContextConfig {
        crate::config::ContextConfig {
            image: "registry.example.test/namespace-manager:v1".to_string(),
            ..Default::default()
        }
    }

    // ========================================================================
    // Cron Parsing Tests
    // ========================================================================

    #[test]
    fn test_parse_five_field_cron() {
        let schedule = parse_cron("*/5 * * * *").expect("five-field cron");

        let after = Utc.with_ymd_and_hms(2025, 3, 1, 12, 1, 0).unwrap();
        let next = schedule.after(&after).next().expect("next tick");
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 1, 12, 5, 0).unwrap());
    }

    #[test]
    fn test_parse_six_field_cron_passes_through() {
        let schedule = parse_cron("0 0 * * * *").expect("six-field cron");

        let after = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();
        let next = schedule.after(&after).next().expect("next tick");
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_invalid_cron_is_an_error() {
        assert!(parse_cron("not a cron").is_err());
        assert!(parse_cron("99 * * * *").is_err(), "Minute 99 is out of range");
    }

    #[test]
    fn test_next_tick_finds_earliest_schedule() {
        let raw = r#"
namespaces:
  - name_globs: ["ci-*"]
    tasks:
      check-namespace:
        schedule: "*/10 * * * *"
      get-owner-info:
        schedule: "*/3 * * * *"
"#;
        let mut config: Config = serde_yaml::from_str(raw).unwrap();
        config.validate().unwrap();

        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 30).unwrap();
        let tick = next_tick(&config, now).expect("a tick");
        assert_eq!(
            tick,
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 3, 0).unwrap(),
            "The 3-minute schedule ticks first"
        );
    }

    #[test]
    fn test_next_tick_without_schedules() {
        let mut config: Config = serde_yaml::from_str("namespaces: []").unwrap();
        config.validate().unwrap();
        assert!(next_tick(&config, Utc::now()).is_none());
    }

    // ========================================================================
    // Drift Detection Tests
    // ========================================================================

    #[test]
    fn test_identical_render_does_not_differ() {
        let desired = build_cron_job(
            &context(),
            TaskKind::CheckNamespace,
            "ci-a",
            &TaskSettings::default(),
            "*/5 * * * *",
        );
        let live = desired.clone();

        assert!(!cron_job_differs(&desired, &live));
    }

    #[test]
    fn test_schedule_change_differs() {
        let desired = build_cron_job(
            &context(),
            TaskKind::CheckNamespace,
            "ci-a",
            &TaskSettings::default(),
            "*/5 * * * *",
        );
        let live = build_cron_job(
            &context(),
            TaskKind::CheckNamespace,
            "ci-a",
            &TaskSettings::default(),
            "*/10 * * * *",
        );

        assert!(cron_job_differs(&desired, &live));
    }

    #[test]
    fn test_image_change_differs() {
        let desired = build_cron_job(
            &context(),
            TaskKind::CheckNamespace,
            "ci-a",
            &TaskSettings::default(),
            "*/5 * * * *",
        );

        let old_context = crate::config::ContextConfig {
            image: "registry.example.test/namespace-manager:v0".to_string(),
            ..Default::default()
        };
        let live = build_cron_job(
            &old_context,
            TaskKind::CheckNamespace,
            "ci-a",
            &TaskSettings::default(),
            "*/5 * * * *",
        );

        assert!(
            cron_job_differs(&desired, &live),
            "An image bump must trigger delete-and-recreate"
        );
    }

    #[test]
    fn test_server_side_defaults_do_not_differ() {
        let desired = build_cron_job(
            &context(),
            TaskKind::CheckNamespace,
            "ci-a",
            &TaskSettings::default(),
            "*/5 * * * *",
        );

        // Simulate fields the API server fills in on the live object.
        let mut live = desired.clone();
        live.metadata.resource_version = Some("12345".to_string());
        live.metadata.uid = Some("00000000-0000-0000-0000-000000000000".to_string());
        if let Some(spec) = live.spec.as_mut() {
            spec.suspend = Some(false);
            spec.starting_deadline_seconds = Some(100);
        }

        assert!(
            !cron_job_differs(&desired, &live),
            "Only rendered fields participate in drift detection"
        );
    }

    #[test]
    fn test_deadline_change_differs() {
        let desired = build_cron_job(
            &context(),
            TaskKind::CheckNamespace,
            "ci-a",
            &TaskSettings {
                deadline: Some(std::time::Duration::from_secs(120)),
                ..Default::default()
            },
            "*/5 * * * *",
        );
        let live = build_cron_job(
            &context(),
            TaskKind::CheckNamespace,
            "ci-a",
            &TaskSettings::default(),
            "*/5 * * * *",
        );

        assert!(cron_job_differs(&desired, &live));
    }
}
