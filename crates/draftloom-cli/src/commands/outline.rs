//! `draftloom outline`: parse an outline file offline.

use draftloom_core::outline::parse_outline;

pub fn run(file: &str, max_depth: usize) -> Result<(), String> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read outline '{}': {}", file, e))?;
    let parsed = parse_outline(&text, max_depth).map_err(|e| e.to_string())?;

    print!("{}", parsed.tree.render_outline());
    println!();
    println!(
        "{} section(s), {} leaf/leaves, depth {}",
        parsed.tree.len(),
        parsed.tree.leaf_count(),
        parsed.tree.max_depth()
    );
    for warning in &parsed.warnings {
        println!("  ⚠ line {}: {}", warning.line, warning.message);
    }
    Ok(())
}
