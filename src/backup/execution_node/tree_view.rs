use crate::backup::execution_node::ExecutionNode;
use crate::backup::highlight::paint;
use crossterm::style::Color;

const VERTICAL: char = '│';
const MIDDLE: char = '├';
const LAST: char = '└';
const HORIZONTAL: char = '─';

const PRIMARY: Color = Color::Blue;
const FAILOVER: Color = Color::Red;
const INACTIVE: Color = Color::DarkGrey;

/// A run of text and the color it is painted with.
type Segment = (String, Option<Color>);

fn render(segments: &[Segment], color: bool) -> String {
    segments
        .iter()
        .map(|(text, segment_color)| paint(text, *segment_color, color))
        .collect()
}

fn width(segments: &[Segment]) -> usize {
    segments.iter().map(|(text, _)| text.chars().count()).sum()
}

fn folder(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// Explains the edge colors. Shown once, above the first tree.
pub fn legend(color: bool) -> Vec<String> {
    let h = HORIZONTAL.to_string();
    vec![
        format!(
            "Legend:   {} Primary Backup      {} Non-executable Backup",
            paint(&h, Some(PRIMARY), color),
            paint(&h, Some(INACTIVE), color)
        ),
        format!(
            "          {} Failover Backup     * Parallelized backup",
            paint(&h, Some(FAILOVER), color)
        ),
    ]
}

struct Edge {
    from: Segment,
    branch: Segment,
    failover: bool,
}

impl ExecutionNode {
    /// Draws the tree rooted at this node from cached availability, one line
    /// per node.
    pub fn render_tree(&self, color: bool) -> Vec<String> {
        let mut lines = Vec::new();
        self.render_into(&mut lines, None, &[], false, false, color);
        lines
    }

    fn render_into(
        &self,
        lines: &mut Vec<String>,
        edge: Option<Edge>,
        indents: &[Segment],
        unavailable: bool,
        parallel: bool,
        color: bool,
    ) {
        let unavailable = unavailable || !self.host.cached_available();
        let host_color = if unavailable {
            Some(INACTIVE)
        } else {
            self.host.highlight_color().color()
        };

        let mut segments: Vec<Segment> = Vec::new();
        match edge {
            None => {
                let group = self
                    .execution_group
                    .map_or_else(|| "    ".to_string(), |group| format!("{group:>3} "));
                segments.push((group, None));
            }
            Some(Edge { from, branch, failover }) => {
                let graph_color = Some(match (unavailable, failover) {
                    (true, _) => INACTIVE,
                    (false, true) => FAILOVER,
                    (false, false) => PRIMARY,
                });
                let from_color = if unavailable { Some(INACTIVE) } else { from.1 };
                let h = HORIZONTAL.to_string();
                if let Some((_, prefix)) = indents.split_last() {
                    segments.extend(prefix.iter().cloned());
                }
                segments.push(branch);
                segments.push((h.clone(), graph_color));
                segments.push((" ".to_string(), None));
                segments.push((from.0, from_color));
                segments.push((" ".to_string(), None));
                segments.push((h.repeat(2), graph_color));
                segments.push((" ".to_string(), None));
                segments.push((folder(self.incoming.dest_folder()), host_color));
                segments.push((" ".to_string(), None));
                segments.push((h, graph_color));
                segments.push((" ".to_string(), None));
            }
        }
        let name = self.host.name();
        // Children branch off below the middle of the host name.
        let branch_column = width(&segments) + name.chars().count() / 2;
        segments.push((name.to_string(), host_color));
        if parallel {
            segments.push(("*".to_string(), Some(INACTIVE).filter(|_| unavailable)));
        }
        lines.push(render(&segments, color));

        let next_indent = " ".repeat(branch_column.saturating_sub(width(indents)));
        let targets_available = self.targets.iter().any(|t| t.host.cached_available());
        let children = self
            .targets
            .iter()
            .map(|child| (child, false))
            .chain(self.failovers.iter().map(|child| (child, true)))
            .collect::<Vec<_>>();

        for (index, &(child, failover)) in children.iter().enumerate() {
            let next = children.get(index + 1);
            let connector: Segment = match next {
                None => (" ".to_string(), None),
                Some(&(_, true)) if unavailable || targets_available => (VERTICAL.to_string(), Some(INACTIVE)),
                Some(&(_, true)) => (VERTICAL.to_string(), Some(FAILOVER)),
                Some(_) if unavailable || !targets_available => (VERTICAL.to_string(), Some(INACTIVE)),
                Some(_) => (VERTICAL.to_string(), Some(PRIMARY)),
            };
            let branch_color = match (unavailable, failover) {
                (true, _) => INACTIVE,
                (false, true) => FAILOVER,
                (false, false) => PRIMARY,
            };
            let branch = if next.is_none() { LAST } else { MIDDLE };
            let from = folder(
                child
                    .incoming
                    .source_folder_override()
                    .as_deref()
                    .unwrap_or(&self.source_folder),
            );
            let mut child_indents = indents.to_vec();
            child_indents.push((next_indent.clone(), None));
            child_indents.push(connector);

            child.render_into(
                lines,
                Some(Edge {
                    from: (from, self.host.highlight_color().color()),
                    branch: (branch.to_string(), Some(branch_color)),
                    failover,
                }),
                &child_indents,
                unavailable || (failover && targets_available),
                self.parallelize && !failover,
                color,
            );
        }
    }
}
