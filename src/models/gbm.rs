//! Gradient-boosted tree ensemble evaluated from an XGBoost JSON dump.
//!
//! Each tree is the nested node layout produced by `Booster.get_dump(dump_format="json")`:
//! split nodes carry `split`, `split_condition`, `yes`, `no`, `missing` and
//! `children`; leaves carry `leaf`. A row goes to `yes` when its value is
//! strictly below the condition and to `missing` when the value is NaN. The
//! prediction is `base_score` plus the sum of the reached leaves.

use crate::error::ModelArtifactError;
use crate::models::Regressor;
use serde::Deserialize;

/// One node as it appears in the dump.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NodeDump {
    Split {
        nodeid: usize,
        split: String,
        split_condition: f64,
        yes: usize,
        no: usize,
        #[serde(default)]
        missing: Option<usize>,
        children: Vec<NodeDump>,
    },
    Leaf {
        nodeid: usize,
        leaf: f64,
    },
}

impl NodeDump {
    fn nodeid(&self) -> usize {
        match self {
            NodeDump::Split { nodeid, .. } | NodeDump::Leaf { nodeid, .. } => *nodeid,
        }
    }
}

/// Serialized ensemble.
#[derive(Debug, Clone, Deserialize)]
pub struct GbmDump {
    #[serde(default)]
    pub base_score: f64,
    /// Feature names the split names refer to, when stored with the model
    #[serde(default)]
    pub feature_names: Vec<String>,
    pub trees: Vec<NodeDump>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Split {
        feature: usize,
        threshold: f32,
        yes: usize,
        no: usize,
        missing: usize,
    },
    Leaf(f64),
}

/// A single tree flattened into an arena; index 0 is the root.
#[derive(Debug, Clone, PartialEq)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn eval(&self, row: &[f32]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    yes,
                    no,
                    missing,
                } => {
                    let x = row.get(*feature).copied().unwrap_or(f32::NAN);
                    idx = if x.is_nan() {
                        *missing
                    } else if x < *threshold {
                        *yes
                    } else {
                        *no
                    };
                }
            }
        }
    }
}

/// Gradient-boosted regression trees.
#[derive(Debug, Clone, PartialEq)]
pub struct GbmRegressor {
    base_score: f64,
    feature_count: usize,
    trees: Vec<Tree>,
}

impl GbmRegressor {
    /// Build from a dump. Split names resolve against `feature_names` (by
    /// name, or `f<index>`).
    pub fn from_dump(dump: GbmDump, feature_names: &[String]) -> Result<Self, ModelArtifactError> {
        let names: &[String] = if dump.feature_names.is_empty() {
            feature_names
        } else {
            &dump.feature_names
        };

        let trees = dump
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, root)| {
                let mut nodes = Vec::new();
                flatten(root, names, i, &mut nodes)?;
                Ok(Tree { nodes })
            })
            .collect::<Result<Vec<_>, ModelArtifactError>>()?;

        Ok(Self {
            base_score: dump.base_score,
            feature_count: names.len(),
            trees,
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    fn predict_row(&self, row: &[f32]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.eval(row)).sum::<f64>()
    }
}

impl Regressor for GbmRegressor {
    fn name(&self) -> &str {
        "gbtree"
    }

    fn predict(&self, rows: &[Vec<f32>]) -> Result<Vec<f64>, ModelArtifactError> {
        rows.iter()
            .map(|row| {
                if row.len() != self.feature_count {
                    return Err(ModelArtifactError::InputWidth {
                        expected: self.feature_count,
                        actual: row.len(),
                    });
                }
                Ok(self.predict_row(row))
            })
            .collect()
    }
}

/// Append `dump` and its subtree to `nodes`, returning the node's index.
fn flatten(
    dump: NodeDump,
    names: &[String],
    tree: usize,
    nodes: &mut Vec<Node>,
) -> Result<usize, ModelArtifactError> {
    let invalid = |reason: String| ModelArtifactError::InvalidTree { tree, reason };

    match dump {
        NodeDump::Leaf { leaf, .. } => {
            nodes.push(Node::Leaf(leaf));
            Ok(nodes.len() - 1)
        }
        NodeDump::Split {
            nodeid,
            split,
            split_condition,
            yes,
            no,
            missing,
            children,
        } => {
            let feature = resolve_feature(&split, names)
                .ok_or_else(|| invalid(format!("node {nodeid} splits on unknown feature '{split}'")))?;

            let idx = nodes.len();
            nodes.push(Node::Leaf(0.0));

            let mut child_slots = Vec::with_capacity(children.len());
            for child in children {
                let child_id = child.nodeid();
                child_slots.push((child_id, flatten(child, names, tree, nodes)?));
            }
            let slot = |id: usize| {
                child_slots
                    .iter()
                    .find(|(cid, _)| *cid == id)
                    .map(|(_, slot)| *slot)
                    .ok_or_else(|| invalid(format!("node {nodeid} points to missing child {id}")))
            };

            let yes = slot(yes)?;
            let no = slot(no)?;
            let missing = match missing {
                Some(id) => slot(id)?,
                None => yes,
            };

            nodes[idx] = Node::Split {
                feature,
                threshold: split_condition as f32,
                yes,
                no,
                missing,
            };
            Ok(idx)
        }
    }
}

fn resolve_feature(split: &str, names: &[String]) -> Option<usize> {
    names.iter().position(|n| n == split).or_else(|| {
        split
            .strip_prefix('f')
            .and_then(|i| i.parse::<usize>().ok())
            .filter(|&i| i < names.len())
    })
}
