//! DOT rendering of the dependency graph.

use std::collections::{hash_map::DefaultHasher, BTreeSet};
use std::hash::{Hash, Hasher};

use crate::error::TapeResult;
use crate::tape::node::NodeId;
use crate::tape::Tape;
use crate::value::TapeValue;

fn cluster_id(label: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    label.hash(&mut hasher);
    hasher.finish()
}

impl<V: TapeValue> Tape<V> {
    /// Renders the subgraph reachable from `roots` as DOT source.
    ///
    /// Prefix components become nested subgraph clusters, scalar nodes
    /// are marked `[s]`, nodes fed by a special pull-back are drawn as
    /// double octagons, user-named (quoted) labels are filled salmon and
    /// the requested roots cornflower blue. The traversal keeps its own
    /// visited set, so rendering never disturbs a pending schedule.
    pub fn graphviz(&self, roots: &[NodeId]) -> TapeResult<String> {
        let mut visited: BTreeSet<NodeId> = BTreeSet::new();
        for &root in roots {
            let mut stack = vec![root];
            while let Some(index) = stack.pop() {
                if !visited.insert(index) {
                    continue;
                }
                let node = self.store.node(index)?;
                stack.extend(node.edges.iter().map(|edge| edge.source));
            }
        }

        let mut out = String::new();
        out.push_str("digraph {\n");
        out.push_str("  rankdir=BT;\n");
        out.push_str("  fontname=Consolas;\n");
        out.push_str("  node [shape=record fontname=Consolas];\n");

        let mut current_path = String::new();
        let mut current_depth = 0usize;

        for &index in &visited {
            let node = self.store.node(index)?;
            if node.label.is_empty() {
                continue;
            }

            let (path, label) = match node.label.rfind('/') {
                Some(sep) => (&node.label[..sep], &node.label[sep + 1..]),
                None => ("", node.label.as_str()),
            };

            if current_path != path {
                for _ in 0..current_depth {
                    out.push_str("  }\n");
                }
                current_depth = 0;
                current_path = path.to_string();

                for component in path.split('/') {
                    if component.is_empty() {
                        break;
                    }
                    out.push_str(&format!(
                        "  subgraph cluster{} {{\n  label=\"{component}\";\n",
                        cluster_id(component)
                    ));
                    current_depth += 1;
                }
            }

            out.push_str(&format!("  {index} [label=\"{label}"));
            if node.is_scalar() {
                out.push_str(" [s]");
            }
            out.push_str(&format!("\\n#{index} [{}]\"", node.ref_count));
            if node.label.starts_with('\'') {
                out.push_str(" fillcolor=salmon style=filled");
            }
            out.push_str("];\n");
        }
        for _ in 0..current_depth {
            out.push_str("  }\n");
        }

        for &index in &visited {
            let node = self.store.node(index)?;
            for edge in &node.edges {
                out.push_str(&format!("  {index} -> {};\n", edge.source));
                if edge.is_special() {
                    out.push_str(&format!("  {index} [shape=doubleoctagon];\n"));
                }
            }
        }

        for &root in roots {
            out.push_str(&format!(
                "  {root} [fillcolor=cornflowerblue style=filled];\n"
            ));
        }

        out.push('}');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Vector;

    fn quiet_tape() -> Tape<Vector> {
        let mut tape = Tape::new();
        tape.set_log_level(0);
        tape
    }

    #[test]
    fn nodes_edges_and_roots_are_rendered() {
        let mut tape = quiet_tape();
        let x = tape.append_leaf(1);
        let y = tape.append("mul", 1, x, Vector::from_scalar(2.0)).unwrap();

        let dot = tape.graphviz(&[y]).unwrap();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains(&format!("{y} [label=\"mul [s]\\n#{y} [1]\"]")));
        assert!(dot.contains(&format!("{y} -> {x};")));
        assert!(dot.contains(&format!(
            "{y} [fillcolor=cornflowerblue style=filled];"
        )));
    }

    #[test]
    fn user_named_nodes_are_highlighted() {
        let mut tape = quiet_tape();
        let x = tape.append_leaf(1);
        tape.set_label(x, "input").unwrap();
        let dot = tape.graphviz(&[x]).unwrap();
        assert!(dot.contains("label=\"'input' [s]"));
        assert!(dot.contains("fillcolor=salmon style=filled"));
    }

    #[test]
    fn special_edges_change_the_node_shape() {
        let mut tape = quiet_tape();
        let buffer = tape.append_leaf(4);
        let slot = crate::tape::context::index_slot(buffer);
        tape.set_scatter_gather_operand(slot, 4, false);
        let picked = tape
            .append_gather(vec![0, 2], vec![true, true])
            .unwrap();

        let dot = tape.graphviz(&[picked]).unwrap();
        assert!(dot.contains(&format!("{picked} [shape=doubleoctagon];")));
    }

    #[test]
    fn rendering_preserves_a_pending_schedule() {
        let mut tape = quiet_tape();
        let x = tape.append_leaf(1);
        let y = tape.append("mul", 1, x, Vector::from_scalar(3.0)).unwrap();
        tape.set_gradient(y, Vector::from_scalar(1.0)).unwrap();

        let _ = tape.graphviz(&[y]).unwrap();

        tape.backward(false).unwrap();
        assert_eq!(tape.gradient(x).unwrap().data(), &[3.0]);
    }
}
