use crate::chunks::Chunk;
use indexmap::IndexMap;
use smtio::term::{full_perm, Ident, Term};
use std::collections::HashSet;

/// An ordered mapping from program variables to terms.  Immutable value
/// object; extension produces a new store.
#[derive(Clone, Debug, Default)]
pub struct Store {
    map: IndexMap<Ident, Term>,
}

impl Store {
    pub fn new() -> Store {
        Store { map: IndexMap::new() }
    }

    pub fn get(&self, x: &Ident) -> Option<&Term> {
        self.map.get(x)
    }

    pub fn plus(&self, x: &Ident, t: &Term) -> Store {
        let mut map = self.map.clone();
        map.insert(x.clone(), t.clone());
        Store { map }
    }
}

/// A multiset of chunks.  All mutation is copy-on-write.
#[derive(Clone, Debug, Default)]
pub struct Heap {
    chunks: Vec<Chunk>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap { chunks: Vec::new() }
    }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Heap {
        Heap { chunks }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn plus(&self, chunk: Chunk) -> Heap {
        let mut chunks = self.chunks.clone();
        chunks.push(chunk);
        Heap { chunks }
    }

    pub fn without(&self, index: usize) -> Heap {
        let mut chunks = self.chunks.clone();
        chunks.remove(index);
        Heap { chunks }
    }

    pub fn replaced(&self, index: usize, chunk: Chunk) -> Heap {
        let mut chunks = self.chunks.clone();
        chunks[index] = chunk;
        Heap { chunks }
    }
}

/// The symbolic state threaded through the producer and consumer.  The path
/// conditions live in the decider, which the verifier owns alongside this.
#[derive(Clone, Debug)]
pub struct State {
    pub store: Store,
    pub heap: Heap,
    /// Stack of reserve heaps used while processing magic wands; the topmost
    /// is the "used" heap of an exhale-ext.
    pub reserve_heaps: Vec<Heap>,
    pub exhale_ext: bool,
    /// Set while re-running a failed block after heap consolidation.
    pub retrying: bool,
    /// Multiplied into every produced and consumed permission; enables
    /// unfolding/applying inside a fractional context.
    pub scaling: Term,
    /// Fields whose chunks have been split to quantified form.
    pub qp_fields: HashSet<Ident>,
    /// Predicates whose chunks have been split to quantified form.
    pub qp_predicates: HashSet<Ident>,
    /// When set, every asserted goal is implied by this guard (partial
    /// verification).
    pub partial_guard: Option<Term>,
}

impl State {
    pub fn new() -> State {
        State {
            store: Store::new(),
            heap: Heap::new(),
            reserve_heaps: Vec::new(),
            exhale_ext: false,
            retrying: false,
            scaling: full_perm(),
            qp_fields: HashSet::new(),
            qp_predicates: HashSet::new(),
            partial_guard: None,
        }
    }

    pub fn with_store(&self, store: Store) -> State {
        let mut s = self.clone();
        s.store = store;
        s
    }

    pub fn with_heap(&self, heap: Heap) -> State {
        let mut s = self.clone();
        s.heap = heap;
        s
    }
}
