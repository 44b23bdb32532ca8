pub mod def;
pub mod prover;
pub mod term;
pub mod term_util;

#[macro_use]
pub mod printer;

mod emitter;
mod smt_process;
#[cfg(test)]
mod tests;
mod util;
