// src/prolly/diff.rs

//! Set difference between trees
//!
//! The walk advances two cursors in key order and hops over whole
//! leaves whose addresses match, so the cost tracks the size of the
//! difference for trees that share history. The three-way form joins
//! two diffs against a common base and is the substrate of the merge
//! engine.

use super::cursor::Cursor;
use super::ProllyMap;
use crate::{Error, Result};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

/// One changed key between two maps
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub key: Vec<u8>,
    /// Value in the `from` map; `None` when added
    pub from: Option<Vec<u8>>,
    /// Value in the `to` map; `None` when removed
    pub to: Option<Vec<u8>>,
}

/// One key as seen by a merge base and both merge sides
#[derive(Debug, Clone, PartialEq)]
pub struct ThreeWayEntry {
    pub key: Vec<u8>,
    pub base: Option<Vec<u8>>,
    pub ours: Option<Vec<u8>>,
    pub theirs: Option<Vec<u8>>,
}

impl ThreeWayEntry {
    pub fn ours_changed(&self) -> bool {
        self.ours != self.base
    }

    pub fn theirs_changed(&self) -> bool {
        self.theirs != self.base
    }
}

fn check_cancel(cancel: Option<&AtomicBool>) -> Result<()> {
    if let Some(flag) = cancel {
        if flag.load(AtomicOrdering::Relaxed) {
            return Err(Error::Cancelled("diff".to_string()));
        }
    }
    Ok(())
}

/// Enumerate exactly the keys where `from[k] != to[k]`, including
/// presence differences, in key order.
pub fn diff<F>(
    from: &ProllyMap,
    to: &ProllyMap,
    cancel: Option<&AtomicBool>,
    mut cb: F,
) -> Result<()>
where
    F: FnMut(DiffEntry) -> Result<()>,
{
    if from.same_root(to) {
        return Ok(());
    }
    let order = from.order().clone();
    let store = from.store();
    let root_from = if from.root_addr().is_empty() {
        None
    } else {
        Some(from.root_addr())
    };
    let root_to = if to.root_addr().is_empty() {
        None
    } else {
        Some(to.root_addr())
    };

    let mut a = Cursor::at_start(store.as_ref(), root_from)?;
    let mut b = Cursor::at_start(store.as_ref(), root_to)?;

    loop {
        check_cancel(cancel)?;

        // Shared-leaf skip: both sides sitting at the start of the same
        // chunk means the whole run is identical.
        if let (Some(la), Some(lb)) = (a.leaf_addr_at_start(), b.leaf_addr_at_start()) {
            if la == lb {
                a.skip_leaf()?;
                b.skip_leaf()?;
                continue;
            }
        }

        match (a.peek().is_some(), b.peek().is_some()) {
            (false, false) => return Ok(()),
            (true, false) => {
                let (key, value) = a.next_entry()?.unwrap_or_default();
                cb(DiffEntry {
                    key,
                    from: Some(value),
                    to: None,
                })?;
            }
            (false, true) => {
                let (key, value) = b.next_entry()?.unwrap_or_default();
                cb(DiffEntry {
                    key,
                    from: None,
                    to: Some(value),
                })?;
            }
            (true, true) => {
                let ka = a.peek().map(|(k, _)| k.to_vec()).unwrap_or_default();
                let kb = b.peek().map(|(k, _)| k.to_vec()).unwrap_or_default();
                match order.compare(&ka, &kb) {
                    Ordering::Less => {
                        let (key, value) = a.next_entry()?.unwrap_or_default();
                        cb(DiffEntry {
                            key,
                            from: Some(value),
                            to: None,
                        })?;
                    }
                    Ordering::Greater => {
                        let (key, value) = b.next_entry()?.unwrap_or_default();
                        cb(DiffEntry {
                            key,
                            from: None,
                            to: Some(value),
                        })?;
                    }
                    Ordering::Equal => {
                        let (key, va) = a.next_entry()?.unwrap_or_default();
                        let (_, vb) = b.next_entry()?.unwrap_or_default();
                        if va != vb {
                            cb(DiffEntry {
                                key,
                                from: Some(va),
                                to: Some(vb),
                            })?;
                        }
                    }
                }
            }
        }
    }
}

/// Collect a diff into a vector
pub fn diff_entries(from: &ProllyMap, to: &ProllyMap) -> Result<Vec<DiffEntry>> {
    let mut out = Vec::new();
    diff(from, to, None, |entry| {
        out.push(entry);
        Ok(())
    })?;
    Ok(out)
}

/// Join the diffs (base→ours) and (base→theirs) by key. A key changed
/// on only one side reports the base value for the other side.
pub fn three_way_diff(
    base: &ProllyMap,
    ours: &ProllyMap,
    theirs: &ProllyMap,
) -> Result<Vec<ThreeWayEntry>> {
    let order = base.order().clone();
    let our_diff = diff_entries(base, ours)?;
    let their_diff = diff_entries(base, theirs)?;

    let mut out = Vec::new();
    let mut oi = our_diff.into_iter().peekable();
    let mut ti = their_diff.into_iter().peekable();

    loop {
        match (oi.peek(), ti.peek()) {
            (None, None) => return Ok(out),
            (Some(_), None) => {
                if let Some(o) = oi.next() {
                    out.push(ThreeWayEntry {
                        key: o.key,
                        base: o.from.clone(),
                        ours: o.to,
                        theirs: o.from,
                    });
                }
            }
            (None, Some(_)) => {
                if let Some(t) = ti.next() {
                    out.push(ThreeWayEntry {
                        key: t.key,
                        base: t.from.clone(),
                        ours: t.from,
                        theirs: t.to,
                    });
                }
            }
            (Some(o), Some(t)) => {
                let advance = order.compare(&o.key, &t.key);
                match advance {
                    Ordering::Less => {
                        if let Some(o) = oi.next() {
                            out.push(ThreeWayEntry {
                                key: o.key,
                                base: o.from.clone(),
                                ours: o.to,
                                theirs: o.from,
                            });
                        }
                    }
                    Ordering::Greater => {
                        if let Some(t) = ti.next() {
                            out.push(ThreeWayEntry {
                                key: t.key,
                                base: t.from.clone(),
                                ours: t.from,
                                theirs: t.to,
                            });
                        }
                    }
                    Ordering::Equal => {
                        if let (Some(o), Some(t)) = (oi.next(), ti.next()) {
                            out.push(ThreeWayEntry {
                                key: o.key,
                                base: o.from,
                                ours: o.to,
                                theirs: t.to,
                            });
                        }
                    }
                }
            }
        }
    }
}
