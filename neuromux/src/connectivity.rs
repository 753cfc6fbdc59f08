//! Inter-module connectivity.
//!
//! A [`Connectivity`] describes how the ports of one module map onto the
//! ports of another as a family of sparse matrices, one per `(synapse,
//! polarity, parameter)` triple. The emulation core itself only relies on
//! [`Connectivity::transpose`] and the edge-existence predicate; everything
//! else is payload carried for the compute kernels on either side.
//!
//! Connections may be multapses (several synapses between the same port
//! pair) and may carry arbitrarily named parameters; parameters attached to
//! a pair whose `conn` entry is zero describe a nonexistent connection and
//! are ignored.

use std::collections::HashMap;
use std::fmt;

use crate::errors::{Error, Result};
use crate::uid::uid;

/// Name of the parameter that records connection existence.
pub const PARAM_CONN: &str = "conn";

/// Unique id of a connectivity object.
#[derive(Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ConnId(String);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of a parameter matrix: source-to-destination or the reverse.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Polarity {
    /// Source to destination.
    Plus,
    /// Destination to source.
    Minus,
}

impl Polarity {
    /// The opposite polarity.
    pub fn flip(self) -> Polarity {
        match self {
            Polarity::Plus => Polarity::Minus,
            Polarity::Minus => Polarity::Plus,
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Plus => f.write_str("+"),
            Polarity::Minus => f.write_str("-"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct ParamKey {
    syn: usize,
    polarity: Polarity,
    param: String,
}

/// Coordinate-map sparse matrix; only nonzero entries are stored.
#[derive(Clone, Debug, PartialEq)]
struct SparseMatrix {
    shape: (usize, usize),
    entries: HashMap<(usize, usize), f64>,
}

impl SparseMatrix {
    fn new(shape: (usize, usize)) -> SparseMatrix {
        SparseMatrix {
            shape,
            entries: HashMap::new(),
        }
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        self.entries.get(&(row, col)).copied().unwrap_or(0.0)
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        if value == 0.0 {
            self.entries.remove(&(row, col));
        } else {
            self.entries.insert((row, col), value);
        }
    }

    fn nnz(&self) -> usize {
        self.entries.len()
    }

    fn transpose(&self) -> SparseMatrix {
        SparseMatrix {
            shape: (self.shape.1, self.shape.0),
            entries: self
                .entries
                .iter()
                .map(|(&(row, col), &value)| ((col, row), value))
                .collect(),
        }
    }
}

/// Connectivity between the ports of two modules.
#[derive(Clone, Debug)]
pub struct Connectivity {
    id: ConnId,
    n_src: usize,
    n_dest: usize,
    n_mult: usize,
    data: HashMap<ParamKey, SparseMatrix>,
}

impl Connectivity {
    /// Creates an empty connectivity between `n_src` source ports and
    /// `n_dest` destination ports.
    ///
    /// Both port counts must be nonzero. The `conn` matrices for both
    /// polarities exist from the start.
    pub fn new(n_src: usize, n_dest: usize) -> Result<Connectivity> {
        if n_src == 0 || n_dest == 0 {
            return Err(Error::invalid("port counts must be nonzero"));
        }
        let mut data = HashMap::new();
        for polarity in [Polarity::Plus, Polarity::Minus] {
            data.insert(
                ParamKey {
                    syn: 0,
                    polarity,
                    param: PARAM_CONN.to_owned(),
                },
                SparseMatrix::new((n_src, n_dest)),
            );
        }
        Ok(Connectivity {
            id: ConnId(uid()),
            n_src,
            n_dest,
            n_mult: 1,
            data,
        })
    }

    /// Unique id of this connectivity object.
    pub fn id(&self) -> &ConnId {
        &self.id
    }

    /// `(n_src, n_dest)` port counts.
    pub fn shape(&self) -> (usize, usize) {
        (self.n_src, self.n_dest)
    }

    /// Maximum number of synapses between any two ports.
    pub fn n_mult(&self) -> usize {
        self.n_mult
    }

    /// Reads one parameter value; absent entries read as zero.
    pub fn get(&self, src: usize, dest: usize, syn: usize, polarity: Polarity, param: &str) -> f64 {
        let key = ParamKey {
            syn,
            polarity,
            param: param.to_owned(),
        };
        self.data.get(&key).map_or(0.0, |m| m.get(src, dest))
    }

    /// Writes one parameter value.
    ///
    /// A write to a `(syn, param)` slot that has no matrix yet materializes
    /// it, bumping the multapse count as needed. Out-of-range port indices
    /// fail with `InvalidArgument`.
    pub fn set(
        &mut self,
        src: usize,
        dest: usize,
        syn: usize,
        polarity: Polarity,
        param: &str,
        value: f64,
    ) -> Result<()> {
        if src >= self.n_src || dest >= self.n_dest {
            return Err(Error::invalid(format!(
                "port ({}, {}) out of range for shape ({}, {})",
                src, dest, self.n_src, self.n_dest
            )));
        }
        let key = ParamKey {
            syn,
            polarity,
            param: param.to_owned(),
        };
        let shape = (self.n_src, self.n_dest);
        self.data
            .entry(key)
            .or_insert_with(|| SparseMatrix::new(shape))
            .set(src, dest, value);
        if syn + 1 > self.n_mult {
            self.n_mult = syn + 1;
        }
        Ok(())
    }

    /// Marks the forward connection `(src, dest)` as existing.
    pub fn link(&mut self, src: usize, dest: usize) -> Result<()> {
        self.set(src, dest, 0, Polarity::Plus, PARAM_CONN, 1.0)
    }

    /// Whether any forward synapse connects `src` to `dest`.
    pub fn is_connected(&self, src: usize, dest: usize) -> bool {
        self.data.iter().any(|(key, matrix)| {
            key.polarity == Polarity::Plus
                && key.param == PARAM_CONN
                && matrix.get(src, dest) != 0.0
        })
    }

    /// Per-source-port flags: true where the port feeds at least one
    /// destination port.
    pub fn src_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.n_src];
        for (key, matrix) in &self.data {
            if key.polarity != Polarity::Plus {
                continue;
            }
            for &(row, _) in matrix.entries.keys() {
                mask[row] = true;
            }
        }
        mask
    }

    /// Indices of source ports with at least one outgoing connection.
    pub fn src_indices(&self) -> Vec<usize> {
        self.src_mask()
            .into_iter()
            .enumerate()
            .filter_map(|(index, set)| if set { Some(index) } else { None })
            .collect()
    }

    /// Approximate number of bytes held by the nonzero entries.
    pub fn nbytes(&self) -> usize {
        self.data
            .values()
            .map(|matrix| matrix.nnz() * std::mem::size_of::<f64>())
            .sum()
    }

    /// Returns the role-swapped view: every edge `(s, d)` becomes `(d, s)`
    /// with its polarity flipped, and every parameter matrix is transposed.
    ///
    /// Transposing twice recovers the original up to the fresh object id.
    pub fn transpose(&self) -> Connectivity {
        let data = self
            .data
            .iter()
            .map(|(key, matrix)| {
                (
                    ParamKey {
                        syn: key.syn,
                        polarity: key.polarity.flip(),
                        param: key.param.clone(),
                    },
                    matrix.transpose(),
                )
            })
            .collect();
        Connectivity {
            id: ConnId(uid()),
            n_src: self.n_dest,
            n_dest: self.n_src,
            n_mult: self.n_mult,
            data,
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connectivity {} ({} -> {}, {} parameter matrices)",
            self.id,
            self.n_src,
            self.n_dest,
            self.data.len()
        )
    }
}
