//! Output rendering for the `alphred` CLI.

use alphred_core::{RunNode, WorkflowRun};

/// Print a run's status plus a per-node latest-attempt summary, the
/// `status --run <id>` surface.
pub fn print_run_status(run: &WorkflowRun, latest_nodes: &[RunNode]) {
    println!("Run: {}", run.id);
    println!("  Status:     {}", run.status.as_str().to_uppercase());
    if let Some(repo) = &run.repo {
        println!("  Repo:       {repo}");
    }
    if let Some(branch) = &run.branch {
        println!("  Branch:     {branch}");
    }
    println!("  Created:    {}", format_time(&run.created_at));
    println!("  Updated:    {}", format_time(&run.updated_at));
    if let Some(completed_at) = &run.completed_at {
        println!("  Completed:  {}", format_time(completed_at));
    }

    if latest_nodes.is_empty() {
        return;
    }

    let mut nodes: Vec<&RunNode> = latest_nodes.iter().collect();
    nodes.sort_by_key(|n| n.sequence_index);

    println!();
    println!("  Nodes:");
    println!(
        "    {:<24}  {:<10}  {:<7}  {:<10}",
        "NODE_KEY", "STATUS", "ATTEMPT", "ROLE"
    );
    println!("    {}", "-".repeat(60));
    for node in nodes {
        println!(
            "    {:<24}  {:<10}  {:<7}  {:<10}",
            truncate(&node.node_key, 24),
            node.status.as_str().to_uppercase(),
            node.attempt,
            node.node_role.as_str(),
        );
    }
}

fn format_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}…", &s[..max_len.saturating_sub(1)])
    }
}
