use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::backend::{ExpansionLookup, RunParameters};
use crate::error::{ExecutorError, ExpansionLookupError};

use super::graph::TaskGraph;
use super::types::ExpansionRequirement;

/// How one dynamic template was resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExpansionOutcome {
    Expanded { instances: Vec<String> },
    FellBack { reason: String },
}

/// Per-template expansion results for the run report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpansionSummary {
    pub templates: BTreeMap<String, ExpansionOutcome>,
}

impl ExpansionSummary {
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn expanded_count(&self) -> usize {
        self.templates
            .values()
            .filter(|o| matches!(o, ExpansionOutcome::Expanded { .. }))
            .count()
    }

    pub fn fallback_count(&self) -> usize {
        self.templates.len() - self.expanded_count()
    }
}

/// One-shot rewrite of dynamic templates before scheduling starts.
pub struct ExpansionResolver {
    lookup: Option<Arc<dyn ExpansionLookup>>,
}

impl ExpansionResolver {
    pub fn new(lookup: Option<Arc<dyn ExpansionLookup>>) -> Self {
        Self { lookup }
    }

    /// Expand every template, then freeze the graph.
    ///
    /// Lookups for all templates run concurrently. A failed or empty lookup
    /// keeps the template as its own single instance.
    pub async fn resolve(
        &self,
        graph: &mut TaskGraph,
        params: &RunParameters,
    ) -> Result<ExpansionSummary, ExecutorError> {
        let templates = graph.templates();
        let mut summary = ExpansionSummary::default();

        if !templates.is_empty() {
            let results = self.lookup_all(&templates, params).await;

            for (template, result) in templates.into_iter().zip(results) {
                let outcome = match result {
                    Ok(requirements) if !requirements.is_empty() => {
                        let instances = graph.expand(&template, requirements)?;
                        tracing::info!(
                            template = %template,
                            count = instances.len(),
                            "expanded dynamic task"
                        );
                        ExpansionOutcome::Expanded { instances }
                    }
                    Ok(_) => {
                        tracing::warn!(
                            template = %template,
                            "expansion lookup returned no requirements; running template once"
                        );
                        graph.keep_template(&template)?;
                        ExpansionOutcome::FellBack {
                            reason: "lookup returned no requirements".to_string(),
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            template = %template,
                            error = %e.message,
                            "expansion lookup failed; running template once"
                        );
                        graph.keep_template(&template)?;
                        ExpansionOutcome::FellBack { reason: e.message }
                    }
                };
                summary.templates.insert(template, outcome);
            }
        }

        graph.freeze()?;
        Ok(summary)
    }

    async fn lookup_all(
        &self,
        templates: &[String],
        params: &RunParameters,
    ) -> Vec<Result<Vec<ExpansionRequirement>, ExpansionLookupError>> {
        let Some(lookup) = self.lookup.as_ref() else {
            return templates
                .iter()
                .map(|t| {
                    Err(ExpansionLookupError {
                        template: t.clone(),
                        message: "no expansion lookup configured".to_string(),
                    })
                })
                .collect();
        };

        join_all(templates.iter().map(|template| async move {
            lookup
                .lookup(template, params)
                .await
                .map_err(|e| ExpansionLookupError {
                    template: template.clone(),
                    message: format!("{}: {:#}", lookup.name(), e),
                })
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::types::{TaskDefinition, TaskState};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct MapLookup(BTreeMap<String, anyhow::Result<Vec<ExpansionRequirement>>>);

    #[async_trait]
    impl ExpansionLookup for MapLookup {
        fn name(&self) -> &str {
            "map"
        }

        async fn lookup(
            &self,
            template: &str,
            _params: &RunParameters,
        ) -> anyhow::Result<Vec<ExpansionRequirement>> {
            match self.0.get(template) {
                Some(Ok(reqs)) => Ok(reqs.clone()),
                Some(Err(e)) => Err(anyhow::anyhow!("{}", e)),
                None => Ok(Vec::new()),
            }
        }
    }

    fn graph() -> TaskGraph {
        TaskGraph::from_definitions(vec![
            TaskDefinition::new("root"),
            TaskDefinition::new("docs")
                .dynamic()
                .with_dependencies(["root"]),
            TaskDefinition::new("broken").dynamic(),
            TaskDefinition::new("empty").dynamic(),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn expands_and_falls_back_per_template() {
        let mut lookups = BTreeMap::new();
        lookups.insert(
            "docs".to_string(),
            Ok(vec![
                ExpansionRequirement::new("r1"),
                ExpansionRequirement::new("r2"),
                ExpansionRequirement::new("r3"),
            ]),
        );
        lookups.insert("broken".to_string(), Err(anyhow::anyhow!("503 upstream")));

        let resolver = ExpansionResolver::new(Some(Arc::new(MapLookup(lookups))));
        let mut graph = graph();
        let summary = resolver
            .resolve(&mut graph, &RunParameters::new())
            .await
            .unwrap();

        assert!(graph.is_frozen());
        assert_eq!(
            summary.templates["docs"],
            ExpansionOutcome::Expanded {
                instances: vec![
                    "docs#r1".to_string(),
                    "docs#r2".to_string(),
                    "docs#r3".to_string()
                ]
            }
        );
        assert!(!graph.contains("docs"));
        assert_eq!(graph.members_of("docs").len(), 3);
        assert!(graph
            .members_of("docs")
            .iter()
            .all(|t| t.dependencies() == ["root".to_string()] && t.state == TaskState::Pending));

        match &summary.templates["broken"] {
            ExpansionOutcome::FellBack { reason } => assert!(reason.contains("503 upstream")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(graph.members_of("broken").len(), 1);
        assert!(graph.get("broken").unwrap().fallback);

        assert_eq!(graph.members_of("empty").len(), 1);
        assert_eq!(summary.expanded_count(), 1);
        assert_eq!(summary.fallback_count(), 2);
    }

    #[tokio::test]
    async fn without_lookup_every_template_runs_once() {
        let resolver = ExpansionResolver::new(None);
        let mut graph = graph();
        let summary = resolver
            .resolve(&mut graph, &RunParameters::new())
            .await
            .unwrap();

        assert_eq!(summary.fallback_count(), 3);
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.ready_tasks(), vec!["root", "broken", "empty"]);
    }
}
