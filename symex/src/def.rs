// Prefixes for generated SMT symbols.  smtio appends "@<n>" to every fresh
// name, so these stay collision-free with program variables.

pub const PREFIX_INVERSE: &str = "inv";
pub const PREFIX_FVF: &str = "$fvf";
pub const PREFIX_PSF: &str = "$psf";
pub const PREFIX_PTAKEN: &str = "pTaken";
pub const PREFIX_SNAP: &str = "$snap";
pub const PREFIX_ARP: &str = "$arp";
pub const PREFIX_BOUND: &str = "$q";

// Quantifier ids
pub const QID_INV_OF_RCVR: &str = "qp.invOfRcvr";
pub const QID_RCVR_OF_INV: &str = "qp.rcvrOfInv";
pub const QID_INJECTIVITY: &str = "qp.injectivity";
pub const QID_NON_NULL: &str = "qp.nonNull";
pub const QID_NON_NEGATIVE: &str = "qp.nonNegative";
pub const QID_VALUE_DEF: &str = "qp.fvfValueDef";
pub const QID_DOMAIN_DEF: &str = "qp.fvfDomainDef";
pub const QID_PSF_VALUE_DEF: &str = "qp.psfValueDef";
pub const QID_DEPLETED: &str = "qp.chunkDepleted";
pub const QID_NEEDED_ZERO: &str = "qp.permTakenComplete";
pub const QID_CONSTRAIN: &str = "qp.constrainRead";
pub const QID_USER: &str = "prog.quant";

pub fn predicate_trigger_name(predicate: &str) -> String {
    format!("{}%trigger", predicate)
}
