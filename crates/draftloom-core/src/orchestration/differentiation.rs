use super::{GenerationStrategy, NodeCallback, NodeJob, Orchestrator, PassReport};
use crate::config::ValidationSettings;
use crate::generation::prompts;
use crate::tree::SectionTree;
use crate::validation::ContentKind;

impl Orchestrator {
    /// Rewrite the content of every node that has some and has not been
    /// rewritten yet. Status and shape are untouched; a node whose rewrite
    /// fails keeps its original content.
    pub async fn differentiate(
        &self,
        tree: &mut SectionTree,
        settings: &ValidationSettings,
        on_node: &mut NodeCallback<'_>,
    ) -> PassReport {
        let jobs: Vec<NodeJob> = tree
            .preorder()
            .into_iter()
            .filter(|id| {
                let node = tree.node(*id);
                !node.differentiated && !node.content.trim().is_empty()
            })
            .map(|id| {
                let node = tree.node(id);
                let kind = if node.is_leaf() {
                    ContentKind::Leaf
                } else {
                    ContentKind::Parent
                };
                let bounds = kind.bounds(settings);
                NodeJob {
                    id,
                    strategy: GenerationStrategy::Differentiate,
                    ctx: prompts::differentiate_request(
                        &node.title,
                        &tree.path(id),
                        &node.content,
                        bounds,
                    ),
                    bounds,
                }
            })
            .collect();

        tracing::info!(targeted = jobs.len(), "Differentiating section content");
        let report = self.run_batch(tree, jobs, on_node).await;
        tracing::info!(
            rewritten = report.generated,
            kept = report.failed,
            cancelled = report.cancelled,
            "Differentiation pass finished"
        );
        report
    }
}
