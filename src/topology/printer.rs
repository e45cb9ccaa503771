// Cluster table rendering for operators.

use super::Cluster;
use super::Segment;

pub fn status_emoji(segment: &Segment) -> &'static str {
    if segment.is_up {
        "✅"
    } else {
        "❌"
    }
}

/// Render the segment configuration table
///
/// Example output:
/// ```text
/// ================================================================================
///   CLUSTER TOPOLOGY:
///   DBID   Content  Role       Preferred  Address                Status
///   --------------------------------------------------------------------------------
///   1      -1       master     master     mdw:5432               ✅ up
///   2      0        primary    primary    sdw1:6000              ✅ up
///   3      0        mirror     mirror     sdw2:7000              ❌ down
/// ================================================================================
/// ```
pub fn render_cluster_table(cluster: &Cluster) -> String {
    let mut out = String::new();
    out.push_str(&"=".repeat(80));
    out.push('\n');
    out.push_str("  CLUSTER TOPOLOGY:\n");
    out.push_str(&format!(
        "  {:<6} {:<8} {:<10} {:<10} {:<22} {}\n",
        "DBID", "Content", "Role", "Preferred", "Address", "Status"
    ));
    out.push_str(&format!("  {}\n", "-".repeat(80)));

    for segment in cluster.segments() {
        out.push_str(&format!(
            "  {:<6} {:<8} {:<10} {:<10} {:<22} {} {}\n",
            segment.dbid,
            segment.content_id,
            segment.role.name(),
            segment.preferred_role.name(),
            format!("{}:{}", segment.host, segment.port),
            status_emoji(segment),
            if segment.is_up { "up" } else { "down" }
        ));
    }

    out.push_str(&"=".repeat(80));
    out.push('\n');
    out
}

pub fn print_cluster_table(cluster: &Cluster) {
    print!("{}", render_cluster_table(cluster));
}
