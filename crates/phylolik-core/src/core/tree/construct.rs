//! Agglomerative tree reconstruction from a distance matrix.

use super::TreeError;
use super::arena::{NodeId, Tree};
use nalgebra::DMatrix;
use serde::Deserialize;
use std::fmt;

/// Symmetric matrix of pairwise distances between named taxa.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    names: Vec<String>,
    values: DMatrix<f64>,
}

impl DistanceMatrix {
    /// Creates a zero matrix over `names`.
    pub fn new(names: Vec<String>) -> Self {
        let n = names.len();
        Self {
            names,
            values: DMatrix::zeros(n, n),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[(i, j)]
    }

    /// Sets both `(i, j)` and `(j, i)`.
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.values[(i, j)] = value;
        self.values[(j, i)] = value;
    }
}

impl fmt::Display for DistanceMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.names.len())?;
        for (i, name) in self.names.iter().enumerate() {
            write!(f, "{name}")?;
            for j in 0..self.names.len() {
                write!(f, " {:.6}", self.values[(i, j)])?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Agglomerative reconstruction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconstructionMethod {
    /// Neighbor joining; produces an unrooted tree with a trifurcating root.
    Nj,
    /// Average linkage; produces a rooted ultrametric tree.
    Upgma,
}

impl ReconstructionMethod {
    pub fn build(&self, matrix: &DistanceMatrix) -> Result<Tree, TreeError> {
        match self {
            ReconstructionMethod::Nj => neighbor_joining(matrix),
            ReconstructionMethod::Upgma => upgma(matrix),
        }
    }
}

struct Cluster {
    name: Option<String>,
    children: Vec<(Cluster, f64)>,
}

impl Cluster {
    fn leaf(name: &str) -> Self {
        Cluster {
            name: Some(name.to_string()),
            children: Vec::new(),
        }
    }

    fn attach(self, tree: &mut Tree, parent: NodeId, length: f64) -> Result<(), TreeError> {
        let id = tree.add_child(parent, self.name, Some(length))?;
        for (child, l) in self.children {
            child.attach(tree, id, l)?;
        }
        Ok(())
    }
}

fn materialize(children: Vec<(Cluster, f64)>) -> Result<Tree, TreeError> {
    let mut tree = Tree::new();
    let root = tree.root();
    for (child, l) in children {
        child.attach(&mut tree, root, l)?;
    }
    Ok(tree)
}

fn working_matrix(matrix: &DistanceMatrix) -> Result<Vec<Vec<f64>>, TreeError> {
    if matrix.len() < 2 {
        return Err(TreeError::TooFewLeaves {
            found: matrix.len(),
            required: 2,
        });
    }
    Ok((0..matrix.len())
        .map(|i| (0..matrix.len()).map(|j| matrix.get(i, j)).collect())
        .collect())
}

/// Neighbor joining (Saitou & Nei). Negative branch lengths are set to zero.
pub fn neighbor_joining(matrix: &DistanceMatrix) -> Result<Tree, TreeError> {
    let mut d = working_matrix(matrix)?;
    let mut active: Vec<Option<Cluster>> = matrix.names().iter().map(|n| Some(Cluster::leaf(n))).collect();
    let mut alive: Vec<usize> = (0..active.len()).collect();

    while alive.len() > 3 {
        let n = alive.len() as f64;
        let r: Vec<f64> = alive
            .iter()
            .map(|&i| alive.iter().map(|&k| d[i][k]).sum())
            .collect();
        let (mut best, mut best_q) = ((0, 1), f64::INFINITY);
        for a in 0..alive.len() {
            for b in (a + 1)..alive.len() {
                let q = (n - 2.0) * d[alive[a]][alive[b]] - r[a] - r[b];
                if q < best_q {
                    best_q = q;
                    best = (a, b);
                }
            }
        }
        let (a, b) = best;
        let (i, j) = (alive[a], alive[b]);
        let dij = d[i][j];
        let li = (dij / 2.0 + (r[a] - r[b]) / (2.0 * (n - 2.0))).max(0.0);
        let lj = (dij - li).max(0.0);
        for &k in &alive {
            if k != i && k != j {
                let dk = (d[i][k] + d[j][k] - dij) / 2.0;
                d[i][k] = dk;
                d[k][i] = dk;
            }
        }
        let (ci, cj) = (take(&mut active, i)?, take(&mut active, j)?);
        active[i] = Some(Cluster {
            name: None,
            children: vec![(ci, li), (cj, lj)],
        });
        alive.remove(b);
    }

    if alive.len() == 2 {
        let (i, j) = (alive[0], alive[1]);
        let half = d[i][j].max(0.0) / 2.0;
        return materialize(vec![(take(&mut active, i)?, half), (take(&mut active, j)?, half)]);
    }

    let (i, j, k) = (alive[0], alive[1], alive[2]);
    let li = ((d[i][j] + d[i][k] - d[j][k]) / 2.0).max(0.0);
    let lj = ((d[i][j] + d[j][k] - d[i][k]) / 2.0).max(0.0);
    let lk = ((d[i][k] + d[j][k] - d[i][j]) / 2.0).max(0.0);
    materialize(vec![
        (take(&mut active, i)?, li),
        (take(&mut active, j)?, lj),
        (take(&mut active, k)?, lk),
    ])
}

/// Unweighted pair group method with arithmetic mean.
pub fn upgma(matrix: &DistanceMatrix) -> Result<Tree, TreeError> {
    let mut d = working_matrix(matrix)?;
    let mut active: Vec<Option<Cluster>> = matrix.names().iter().map(|n| Some(Cluster::leaf(n))).collect();
    let mut sizes = vec![1.0; active.len()];
    let mut heights = vec![0.0; active.len()];
    let mut alive: Vec<usize> = (0..active.len()).collect();

    loop {
        let (mut best, mut best_d) = ((0, 1), f64::INFINITY);
        for a in 0..alive.len() {
            for b in (a + 1)..alive.len() {
                let v = d[alive[a]][alive[b]];
                if v < best_d {
                    best_d = v;
                    best = (a, b);
                }
            }
        }
        let (a, b) = best;
        let (i, j) = (alive[a], alive[b]);
        let height = (best_d / 2.0).max(heights[i]).max(heights[j]);
        let li = height - heights[i];
        let lj = height - heights[j];
        let (ci, cj) = (take(&mut active, i)?, take(&mut active, j)?);
        if alive.len() == 2 {
            return materialize(vec![(ci, li), (cj, lj)]);
        }
        for &k in &alive {
            if k != i && k != j {
                let dk = (sizes[i] * d[i][k] + sizes[j] * d[j][k]) / (sizes[i] + sizes[j]);
                d[i][k] = dk;
                d[k][i] = dk;
            }
        }
        sizes[i] += sizes[j];
        heights[i] = height;
        active[i] = Some(Cluster {
            name: None,
            children: vec![(ci, li), (cj, lj)],
        });
        alive.remove(b);
    }
}

fn take(active: &mut [Option<Cluster>], i: usize) -> Result<Cluster, TreeError> {
    active[i].take().ok_or(TreeError::NodeNotFound { id: i })
}
