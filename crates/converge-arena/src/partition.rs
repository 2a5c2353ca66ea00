// Scenario filtering and job partitioning.
//
// Include patterns select, exclude patterns are applied after include, and
// an empty include list selects everything. The cross product of surviving
// scenarios and resolved providers becomes the job's work items.

use converge_core::{CoreError, ProviderBinding, Result, WorkItem};
use glob::Pattern;

/// Include/exclude glob patterns over scenario paths.
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ScenarioFilter {
    fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
        patterns
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| CoreError::validation(format!("invalid glob {p}: {e}")))
            })
            .collect()
    }
}

/// Apply include-then-exclude filtering to scenario paths, preserving
/// input order.
pub fn filter_scenarios(paths: &[String], filter: &ScenarioFilter) -> Result<Vec<String>> {
    let include = ScenarioFilter::compile(&filter.include)?;
    let exclude = ScenarioFilter::compile(&filter.exclude)?;

    Ok(paths
        .iter()
        .filter(|path| include.is_empty() || include.iter().any(|p| p.matches(path)))
        .filter(|path| !exclude.iter().any(|p| p.matches(path)))
        .cloned()
        .collect())
}

/// Produce the scenario × provider cross product as pending work items.
pub fn partition(
    job_id: &str,
    scenarios: &[String],
    providers: &[ProviderBinding],
    bundle_url: &str,
    max_attempts: u32,
) -> Vec<WorkItem> {
    let mut items = Vec::with_capacity(scenarios.len() * providers.len());
    for scenario in scenarios {
        for provider in providers {
            items.push(WorkItem::new(
                job_id,
                scenario.clone(),
                provider.id.clone(),
                bundle_url,
                max_attempts,
            ));
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::{ProviderDefaults, ProviderType};

    fn paths() -> Vec<String> {
        [
            "scenarios/billing.yaml",
            "scenarios/auth.yaml",
            "scenarios/billing-wip.yaml",
            "tests/integration.yaml",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn binding(id: &str) -> ProviderBinding {
        ProviderBinding {
            id: id.into(),
            provider_type: ProviderType::Mock,
            model: "mock-small".into(),
            base_url: None,
            credential: None,
            defaults: ProviderDefaults::default(),
        }
    }

    #[test]
    fn test_include_then_exclude() {
        let filtered = filter_scenarios(
            &paths(),
            &ScenarioFilter {
                include: vec!["scenarios/*.yaml".into()],
                exclude: vec!["*-wip.yaml".into()],
            },
        )
        .unwrap();
        assert_eq!(
            filtered,
            vec![
                "scenarios/billing.yaml".to_string(),
                "scenarios/auth.yaml".to_string()
            ]
        );
    }

    #[test]
    fn test_include_and_exclude_sets_are_disjoint() {
        // {include:[a]} and {exclude:[a]} select disjoint sets
        let all = paths();
        let only_a = filter_scenarios(
            &all,
            &ScenarioFilter {
                include: vec!["scenarios/auth.yaml".into()],
                exclude: vec![],
            },
        )
        .unwrap();
        let all_but_a = filter_scenarios(
            &all,
            &ScenarioFilter {
                include: vec![],
                exclude: vec!["scenarios/auth.yaml".into()],
            },
        )
        .unwrap();
        for path in &only_a {
            assert!(!all_but_a.contains(path));
        }
        assert_eq!(only_a.len() + all_but_a.len(), all.len());
    }

    #[test]
    fn test_empty_include_selects_all() {
        let filtered = filter_scenarios(&paths(), &ScenarioFilter::default()).unwrap();
        assert_eq!(filtered.len(), 4);
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let err = filter_scenarios(
            &paths(),
            &ScenarioFilter {
                include: vec!["[".into()],
                exclude: vec![],
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_partition_count_is_cross_product() {
        let scenarios = vec!["s1".to_string(), "s2".to_string()];
        let providers = vec![binding("p1"), binding("p2")];
        let items = partition("job-1", &scenarios, &providers, "s3://bundles/job-1", 3);

        assert_eq!(items.len(), scenarios.len() * providers.len());
        for item in &items {
            assert_eq!(item.job_id, "job-1");
            assert_eq!(item.bundle_url, "s3://bundles/job-1");
            assert_eq!(item.max_attempts, 3);
        }
        // All combinations distinct
        let ids: std::collections::HashSet<_> = items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids.len(), 4);
    }
}
