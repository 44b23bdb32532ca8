use crate::chunks::Chunk;
use crate::state::{Heap, State};
use crate::verifier::Verifier;
use smtio::prover::ProverError;
use smtio::term::{full_perm, mk_eq, mk_perm_at_most, mk_perm_plus, Term};

/// Merge and normalise heap chunks: basic chunks with syntactically equal
/// ids are merged (permissions summed, values/snapshots equated), and the
/// permission upper bound is re-assumed for field chunks.  Returns a new
/// state; the input heap is never modified.
pub fn consolidate(s: &State, v: &mut Verifier) -> Result<State, ProverError> {
    let mut merged: Vec<Chunk> = Vec::new();
    let mut equalities: Vec<Term> = Vec::new();

    for chunk in s.heap.chunks() {
        match chunk {
            Chunk::Field(fc) => {
                let existing = merged.iter_mut().find_map(|c| match c {
                    Chunk::Field(mc) if mc.field == fc.field && mc.rcvr == fc.rcvr => Some(mc),
                    _ => None,
                });
                match existing {
                    Some(mc) => {
                        equalities.push(mk_eq(&mc.value, &fc.value));
                        *mc = mc.with_perm(mk_perm_plus(&mc.perm, &fc.perm));
                    }
                    None => merged.push(chunk.clone()),
                }
            }
            Chunk::Predicate(pc) => {
                let existing = merged.iter_mut().find_map(|c| match c {
                    Chunk::Predicate(mc) if mc.name == pc.name && mc.args == pc.args => Some(mc),
                    _ => None,
                });
                match existing {
                    Some(mc) => {
                        equalities.push(mk_eq(&mc.snap, &pc.snap));
                        *mc = mc.with_perm(mk_perm_plus(&mc.perm, &pc.perm));
                    }
                    None => merged.push(chunk.clone()),
                }
            }
            other => merged.push(other.clone()),
        }
    }

    // permissions at a single location never exceed full permission
    let mut bounds: Vec<Term> = Vec::new();
    for chunk in &merged {
        if let Chunk::Field(fc) = chunk {
            bounds.push(mk_perm_at_most(&fc.perm, &full_perm()));
        }
    }

    v.decider.assume(&equalities)?;
    v.decider.assume(&bounds)?;
    Ok(s.with_heap(Heap::from_chunks(merged)))
}
