//! Human readable views of the network: who connected to whom, and where
//! two chains part ways.

use std::fmt;
use std::sync::Arc;

use crate::node::NodeHandle;
use crate::rpc::RpcResult;

const CELL_WIDTH: usize = 4;
const SHARED_SHOWN: usize = 3;
const PREFIX_LEN: usize = 8;

fn cell(s: &str) -> String {
    format!("{:>width$}", s, width = CELL_WIDTH)
}

/// Square matrix of the recorded connections of `nodes`.
///
/// Nodes are sorted by port and numbered from 1. Cell `(a, b)` is `--` on
/// the diagonal, otherwise `o` or `x` for whether `a` connected to `b`
/// followed by the same for `b` to `a`.
///
/// ```text
///        1   2   3
///    1  --  ox  xx
///    2  xo  --  xx
///    3  xx  xx  --
/// ```
pub fn connection_matrix(nodes: &[Arc<NodeHandle>]) -> String {
    let mut sorted: Vec<&Arc<NodeHandle>> = nodes.iter().collect();
    sorted.sort_by_key(|node| node.id().port);

    let mut out = " ".repeat(CELL_WIDTH);
    for number in 1..=sorted.len() {
        out.push_str(&cell(&number.to_string()));
    }
    for (row, a) in sorted.iter().enumerate() {
        out.push('\n');
        out.push_str(&cell(&(row + 1).to_string()));
        for b in &sorted {
            let z = if a.id() == b.id() {
                "--".to_string()
            } else {
                let mark = |connected: bool| if connected { 'o' } else { 'x' };
                format!("{}{}", mark(a.is_connected(b, false)), mark(b.is_connected(a, false)))
            };
            out.push_str(&cell(&z));
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainLine {
    Shared(String),
    /// Shared blocks left out
    Elided,
    Diverged { a: Option<String>, b: Option<String> },
}

/// Block-by-block comparison of two chains from genesis to their tips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainComparison {
    pub lines: Vec<ChainLine>,
    /// Height of the last block both chains share
    pub common_height: u64,
    pub height_a: u64,
    pub height_b: u64,
}

impl ChainComparison {
    pub fn has_diverged(&self) -> bool {
        self.common_height < self.height_a.min(self.height_b)
    }
}

fn prefix(hash: &str) -> &str {
    hash.get(..PREFIX_LEN).unwrap_or(hash)
}

impl fmt::Display for ChainComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pad = " ".repeat(PREFIX_LEN);
        for line in &self.lines {
            match line {
                ChainLine::Shared(hash) => writeln!(f, "{}{}", pad, prefix(hash))?,
                ChainLine::Elided => writeln!(f, "{}...", pad)?,
                ChainLine::Diverged { a: Some(a), b: Some(b) } => {
                    writeln!(f, "{}{}{}", prefix(a), pad, prefix(b))?
                }
                ChainLine::Diverged { a: Some(a), b: None } => writeln!(f, "{}", prefix(a))?,
                ChainLine::Diverged { a: None, b: Some(b) } => {
                    writeln!(f, "{}{}{}", pad, pad, prefix(b))?
                }
                ChainLine::Diverged { a: None, b: None } => {}
            }
        }
        Ok(())
    }
}

// Collects lines, showing at most three shared blocks in a row around
// divergences
struct LineBuilder {
    lines: Vec<ChainLine>,
    shown: usize,
    kept: Vec<String>,
}

impl LineBuilder {
    fn shared(&mut self, hash: String) {
        self.shown += 1;
        if self.shown > SHARED_SHOWN {
            self.kept.push(hash);
        } else {
            self.lines.push(ChainLine::Shared(hash));
        }
    }

    fn diverged(&mut self, a: Option<String>, b: Option<String>) {
        self.flush();
        self.shown = 0;
        self.lines.push(ChainLine::Diverged { a, b });
    }

    fn flush(&mut self) {
        if self.kept.len() > SHARED_SHOWN {
            self.lines.push(ChainLine::Elided);
            let skip = self.kept.len() - SHARED_SHOWN;
            self.kept.drain(..skip);
        }
        self.lines
            .extend(self.kept.drain(..).map(ChainLine::Shared));
    }
}

/// Walk both chains from height 1 and report where they agree and where
/// they differ. Genesis is assumed shared.
pub async fn compare_chains(a: &NodeHandle, b: &NodeHandle) -> RpcResult<ChainComparison> {
    let height_a = a.rpc().get_block_count().await?;
    let height_b = b.rpc().get_block_count().await?;
    let genesis = a.rpc().get_block_hash(0).await?;

    let mut builder = LineBuilder {
        lines: vec![ChainLine::Shared(genesis)],
        shown: 1,
        kept: Vec::new(),
    };
    let mut common_height = 0;
    let mut forked = false;

    for height in 1..=height_a.min(height_b) {
        let hash_a = a.rpc().get_block_hash(height).await?;
        let hash_b = b.rpc().get_block_hash(height).await?;
        if hash_a == hash_b {
            if !forked {
                common_height = height;
            }
            builder.shared(hash_a);
        } else {
            forked = true;
            builder.diverged(Some(hash_a), Some(hash_b));
        }
    }
    builder.flush();

    for height in height_b.min(height_a) + 1..=height_a {
        let hash = a.rpc().get_block_hash(height).await?;
        builder.lines.push(ChainLine::Diverged {
            a: Some(hash),
            b: None,
        });
    }
    for height in height_a.min(height_b) + 1..=height_b {
        let hash = b.rpc().get_block_hash(height).await?;
        builder.lines.push(ChainLine::Diverged {
            a: None,
            b: Some(hash),
        });
    }

    Ok(ChainComparison {
        lines: builder.lines,
        common_height,
        height_a,
        height_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::sim::SimNetwork;
    use tokio::time::Instant;

    fn handles(sim: &SimNetwork, ports: &[u16]) -> Vec<Arc<NodeHandle>> {
        ports
            .iter()
            .map(|&port| {
                let id = NodeId::new("127.0.0.1", port, port + 1);
                Arc::new(NodeHandle::from_launched(id.clone(), sim.spawn_node(&id)))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_connection_matrix() {
        let sim = SimNetwork::new();
        // Out of port order on purpose
        let nodes = handles(&sim, &[300, 100, 200]);
        nodes[1].record_connect(nodes[2].id(), Instant::now());

        let expected = [
            "       1   2   3",
            "   1  --  ox  xx",
            "   2  xo  --  xx",
            "   3  xx  xx  --",
        ]
        .join("\n");
        assert_eq!(connection_matrix(&nodes), expected);
    }

    #[tokio::test]
    async fn test_compare_identical_chains() {
        let sim = SimNetwork::new();
        let nodes = handles(&sim, &[100]);
        nodes[0].generate_blocks(6).await.unwrap();

        let cmp = compare_chains(&nodes[0], &nodes[0]).await.unwrap();
        assert!(!cmp.has_diverged());
        assert_eq!(cmp.common_height, 6);
        // genesis, 2 shown, "...", last 3
        assert_eq!(cmp.lines.len(), 7);
        assert_eq!(cmp.lines[3], ChainLine::Elided);
    }

    #[tokio::test]
    async fn test_compare_diverged_chains() {
        let sim = SimNetwork::new();
        let nodes = handles(&sim, &[100, 200]);
        nodes[0].generate_blocks(2).await.unwrap();
        nodes[1].generate_blocks(3).await.unwrap();

        let cmp = compare_chains(&nodes[0], &nodes[1]).await.unwrap();
        assert!(cmp.has_diverged());
        assert_eq!(cmp.common_height, 0);
        assert_eq!(cmp.lines.len(), 4);
        assert!(matches!(
            cmp.lines.last(),
            Some(ChainLine::Diverged { a: None, b: Some(_) })
        ));

        let rendered = cmp.to_string();
        let last = rendered.lines().last().unwrap();
        assert!(last.starts_with(&" ".repeat(16)));
        assert_eq!(last.trim().len(), 8);
    }
}
