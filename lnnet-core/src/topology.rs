use core::fmt;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{NodeId, PeerLink};

/// How nodes are linked
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyPolicy {
    /// i to i+1
    #[default]
    Linear,
    /// first node to every other node
    Star,
    /// linear, closed into a cycle
    Ring,
    /// every unordered pair
    Mesh,
}

impl TopologyPolicy {
    pub const NAMES: [&'static str; 4] = ["linear", "star", "ring", "mesh"];
}

impl Display for TopologyPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TopologyPolicy::Linear => "linear",
            TopologyPolicy::Star => "star",
            TopologyPolicy::Ring => "ring",
            TopologyPolicy::Mesh => "mesh",
        })
    }
}

impl FromStr for TopologyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(TopologyPolicy::Linear),
            "star" => Ok(TopologyPolicy::Star),
            "ring" => Ok(TopologyPolicy::Ring),
            "mesh" => Ok(TopologyPolicy::Mesh),
            _ => Err(format!(
                "unknown topology {:?}, expected one of {}",
                s,
                TopologyPolicy::NAMES.join("|")
            )),
        }
    }
}

/// The links to realize for a roster, in a fixed order
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub policy: TopologyPolicy,
    links: Vec<PeerLink>,
}

impl Topology {
    /// Compute the links for `node_ids` under `policy`.
    ///
    /// Ids are sorted first, so the result depends only on the set of ids.
    /// Self-loops and repeated unordered pairs are dropped, which makes a
    /// two-node ring a single link.
    pub fn build(node_ids: &[NodeId], policy: TopologyPolicy) -> Topology {
        let mut ids = node_ids.to_vec();
        ids.sort();
        ids.dedup();
        let n = ids.len();

        let candidates: Vec<(NodeId, NodeId)> = match policy {
            TopologyPolicy::Linear => ids.windows(2).map(|w| (w[0], w[1])).collect(),
            TopologyPolicy::Star => match ids.split_first() {
                Some((hub, rest)) => rest.iter().map(|id| (*hub, *id)).collect(),
                None => Vec::new(),
            },
            TopologyPolicy::Ring => (0..n).map(|i| (ids[i], ids[(i + 1) % n])).collect(),
            TopologyPolicy::Mesh => (0..n)
                .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
                .map(|(i, j)| (ids[i], ids[j]))
                .collect(),
        };

        let mut seen = BTreeSet::new();
        let links = candidates
            .into_iter()
            .filter_map(|(a, b)| PeerLink::new(a, b))
            .filter(|l| seen.insert(l.key()))
            .collect();
        Topology { policy, links }
    }

    pub fn links(&self) -> &[PeerLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
