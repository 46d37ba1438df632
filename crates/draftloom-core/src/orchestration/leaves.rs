use super::{GenerationStrategy, NodeCallback, NodeJob, Orchestrator, PassReport};
use crate::config::LengthBounds;
use crate::generation::prompts;
use crate::tree::{NodeStatus, SectionTree};

impl Orchestrator {
    /// Generate content for every leaf that is not already `Generated`.
    ///
    /// All leaves are dispatched together; the shared limiter bounds how many
    /// calls are actually in flight. Each request carries the complete
    /// source document.
    pub async fn generate_leaves(
        &self,
        tree: &mut SectionTree,
        document: &str,
        bounds: LengthBounds,
        on_node: &mut NodeCallback<'_>,
    ) -> PassReport {
        let jobs: Vec<NodeJob> = tree
            .leaves()
            .into_iter()
            .filter(|id| tree.node(*id).status != NodeStatus::Generated)
            .map(|id| {
                let title = tree.node(id).title.clone();
                let path = tree.path(id);
                NodeJob {
                    id,
                    strategy: GenerationStrategy::Leaf,
                    ctx: prompts::leaf_request(&title, &path, document, bounds),
                    bounds,
                }
            })
            .collect();

        tracing::info!(
            leaves = tree.leaf_count(),
            targeted = jobs.len(),
            generator = self.generator_name(),
            "Generating leaf content"
        );

        let report = self.run_batch(tree, jobs, on_node).await;

        tracing::info!(
            generated = report.generated,
            cleaned = report.cleaned,
            failed = report.failed,
            cancelled = report.cancelled,
            "Leaf pass finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::GenerationCallError;
    use crate::orchestration::test_support::ScriptedGenerator;
    use crate::orchestration::{CancelFlag, RetryPolicy};
    use crate::outline::parse_outline;

    fn orchestrator(generator: Arc<ScriptedGenerator>) -> Orchestrator {
        Orchestrator::new(
            generator,
            3,
            RetryPolicy::immediate(2),
            Duration::from_secs(5),
            CancelFlag::new(),
        )
    }

    #[tokio::test]
    async fn test_each_leaf_gets_its_own_response() {
        let mut tree = parse_outline("1. A\n1.1 A1\n1.2 A2\n2. B\n3. C\n3.1 C1", 4)
            .unwrap()
            .tree;
        let generator = Arc::new(ScriptedGenerator::new(|ctx, _| {
            Ok(format!("content for {}", ctx.title))
        }));
        let mut completed = Vec::new();
        let report = orchestrator(generator.clone())
            .generate_leaves(&mut tree, "doc", LengthBounds::new(1, 200), &mut |t, id| {
                completed.push(t.node(id).title.clone())
            })
            .await;

        assert_eq!(report.targeted, 4);
        assert_eq!(report.generated, 4);
        assert_eq!(completed.len(), 4);
        for id in tree.leaves() {
            let node = tree.node(id);
            assert_eq!(node.status, NodeStatus::Generated);
            assert_eq!(node.content, format!("content for {}", node.title));
        }
        for id in tree.internal_by_depth().into_values().flatten() {
            assert_eq!(tree.node(id).status, NodeStatus::Pending);
            assert!(tree.node(id).content.is_empty());
        }
    }

    #[tokio::test]
    async fn test_failed_leaf_does_not_abort_siblings() {
        let mut tree = parse_outline("1. Good\n2. Bad\n3. Fine", 4).unwrap().tree;
        let generator = Arc::new(ScriptedGenerator::new(|ctx, _| {
            if ctx.title == "Bad" {
                Err(GenerationCallError::InvalidResponse("nope".into()))
            } else {
                Ok(format!("text {}", ctx.title))
            }
        }));
        let report = orchestrator(generator)
            .generate_leaves(&mut tree, "doc", LengthBounds::new(1, 200), &mut |_, _| {})
            .await;

        assert_eq!(report.generated, 2);
        assert_eq!(report.failed, 1);
        let counts = tree.status_counts();
        assert_eq!(counts.generated, 2);
        assert_eq!(counts.failed, 1);
        let bad = tree.roots()[1];
        assert!(tree.node(bad).error.as_deref().unwrap().contains("nope"));
        assert_eq!(tree.node(bad).attempts, 2);
    }

    #[tokio::test]
    async fn test_generated_leaves_are_not_regenerated() {
        let mut tree = parse_outline("1. Done\n2. Todo", 4).unwrap().tree;
        let done = tree.roots()[0];
        tree.node_mut(done).status = NodeStatus::Generated;
        tree.node_mut(done).content = "kept".to_string();

        let generator = Arc::new(ScriptedGenerator::new(|ctx, _| Ok(format!("new {}", ctx.title))));
        let report = orchestrator(generator.clone())
            .generate_leaves(&mut tree, "doc", LengthBounds::new(1, 200), &mut |_, _| {})
            .await;

        assert_eq!(report.targeted, 1);
        assert_eq!(generator.calls(), 1);
        assert_eq!(tree.node(done).content, "kept");
    }

    #[tokio::test]
    async fn test_cancelled_pass_dispatches_nothing() {
        let mut tree = parse_outline("1. A\n2. B", 4).unwrap().tree;
        let generator = Arc::new(ScriptedGenerator::new(|_, _| Ok("x".to_string())));
        let orch = orchestrator(generator.clone());
        orch.cancel_flag().cancel();
        let report = orch
            .generate_leaves(&mut tree, "doc", LengthBounds::new(1, 200), &mut |_, _| {})
            .await;
        assert_eq!(report.cancelled, 2);
        assert_eq!(generator.calls(), 0);
        assert_eq!(tree.status_counts().pending, 2);
    }
}
