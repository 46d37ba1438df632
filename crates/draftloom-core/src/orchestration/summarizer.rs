use super::{GenerationStrategy, NodeCallback, NodeJob, Orchestrator, PassReport};
use crate::config::LengthBounds;
use crate::generation::prompts;
use crate::tree::{NodeId, NodeStatus, SectionTree};

impl Orchestrator {
    /// Summarize every internal node, deepest level first.
    ///
    /// Each depth is a barrier: no parent at depth `d` is dispatched until
    /// every node at depth `d + 1` is terminal. A parent sees its children's
    /// `(title, content)` pairs in sibling order; a child that is not
    /// `Generated` contributes its title with empty content.
    pub async fn summarize_parents(
        &self,
        tree: &mut SectionTree,
        bounds: LengthBounds,
        on_node: &mut NodeCallback<'_>,
    ) -> PassReport {
        let mut report = PassReport::default();

        for (depth, ids) in tree.internal_by_depth().into_iter().rev() {
            if self.is_cancelled() {
                report.cancelled += ids
                    .iter()
                    .filter(|id| tree.node(**id).status != NodeStatus::Generated)
                    .count();
                continue;
            }

            let jobs: Vec<NodeJob> = ids
                .into_iter()
                .filter(|id| tree.node(*id).status != NodeStatus::Generated)
                .map(|id| parent_job(tree, id, bounds))
                .collect();
            if jobs.is_empty() {
                continue;
            }

            tracing::info!(depth, parents = jobs.len(), "Summarizing parent level");
            let level = self.run_batch(tree, jobs, on_node).await;
            report.merge(level);
        }

        tracing::info!(
            generated = report.generated,
            cleaned = report.cleaned,
            failed = report.failed,
            cancelled = report.cancelled,
            "Summary pass finished"
        );
        report
    }
}

fn parent_job(tree: &SectionTree, id: NodeId, bounds: LengthBounds) -> NodeJob {
    let children: Vec<(String, String)> = tree
        .children(id)
        .iter()
        .map(|child| {
            let node = tree.node(*child);
            let content = if node.status == NodeStatus::Generated {
                node.content.clone()
            } else {
                String::new()
            };
            (node.title.clone(), content)
        })
        .collect();
    let title = tree.node(id).title.clone();
    NodeJob {
        id,
        strategy: GenerationStrategy::ParentSummary,
        ctx: prompts::parent_request(&title, &tree.path(id), &children, bounds),
        bounds,
    }
}
