//! Pick short or wide encodings for branches
//!
//! This module is responsible for laying out the code array: deciding which branches can use a
//! signed 16-bit offset and which need the wide form. The wide forms are longer, so widening one
//! branch can push other branches out of range.
//!
//! ### Encodings
//!
//! `goto` and `jsr` have wide counterparts (`goto_w` and `jsr_w`). Conditional branches don't, so
//! their wide form inverts the condition to skip over a `goto_w`:
//!
//! ```text,ignore,no_run
//!     if* L2                ifnot* L1     (jumps 8 bytes forward)
//!                           goto_w L2
//! L1: ...         =>    L1: ...
//!     ...                   ...
//! L2: ...               L2: ...
//! ```
//!
//! ### Termination
//!
//! Every branch starts out undecided. Given the decisions so far, each instruction has a minimum
//! and a maximum length (an undecided branch may be short or wide, a switch may need up to three
//! bytes of padding), so the distance of every jump is bounded too. A branch whose largest
//! possible distance fits in 16 bits is decided short, and one whose smallest possible distance
//! doesn't fit is decided wide. Decisions are never revisited, so each pass either decides at
//! least one branch or changes nothing.
//!
//! When a pass changes nothing and some branches are still undecided, they are all tried short
//! with exact offsets. The ones that don't fit become wide and the passes resume; if they all fit,
//! the layout is final.

use crate::jvm::Error;
use crate::util::Offset;

/// Most bytes the code array of a method may have
pub const MAX_CODE_LENGTH: usize = u16::MAX as usize;

/// How the length of an instruction depends on the layout
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sizing {
    Fixed(usize),

    /// Branch to the instruction at index `target`
    Branch {
        target: usize,
        short: usize,
        wide: usize,
    },

    /// Switch: the opcode, padding up to a multiple of 4, then `payload` bytes
    Switch { payload: usize },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BranchForm {
    Undecided,
    Short,
    Wide,
}

/// Final layout of a method body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Offset of every instruction, plus the total length at the end
    pub offsets: Vec<usize>,

    /// Encoding of every instruction (only meaningful for branches)
    pub forms: Vec<BranchForm>,

    /// Number of relaxation passes it took
    pub passes: usize,
}

impl Layout {
    pub fn code_length(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn is_wide(&self, index: usize) -> bool {
        self.forms.get(index) == Some(&BranchForm::Wide)
    }
}

/// Bytes of padding after a switch opcode at `offset`
pub fn switch_padding(offset: usize) -> usize {
    3 - offset % 4
}

fn length_bounds(sizing: &Sizing, form: BranchForm) -> (usize, usize) {
    match (sizing, form) {
        (Sizing::Fixed(length), _) => (*length, *length),
        (Sizing::Branch { short, wide, .. }, BranchForm::Undecided) => (*short, *wide),
        (Sizing::Branch { short, .. }, BranchForm::Short) => (*short, *short),
        (Sizing::Branch { wide, .. }, BranchForm::Wide) => (*wide, *wide),
        (Sizing::Switch { payload }, _) => (1 + payload, 4 + payload),
    }
}

fn fits_short(distance: isize) -> bool {
    i16::MIN as isize <= distance && distance <= i16::MAX as isize
}

/// One relaxation pass: decide every branch that the current bounds allow
///
/// Returns whether anything was decided.
pub fn relax_step(items: &[Sizing], forms: &mut [BranchForm]) -> bool {
    let mut lower = Vec::with_capacity(items.len() + 1);
    let mut upper = Vec::with_capacity(items.len() + 1);
    let (mut lo, mut hi) = (0usize, 0usize);
    for (sizing, form) in items.iter().zip(forms.iter()) {
        lower.push(lo);
        upper.push(hi);
        let (min, max) = length_bounds(sizing, *form);
        lo += min;
        hi += max;
    }
    lower.push(lo);
    upper.push(hi);

    let mut changed = false;
    for (index, sizing) in items.iter().enumerate() {
        let target = match (sizing, forms[index]) {
            (Sizing::Branch { target, .. }, BranchForm::Undecided) => *target,
            _ => continue,
        };
        let (min_distance, max_distance, limit) = if target > index {
            (
                lower[target] - lower[index],
                upper[target] - upper[index],
                i16::MAX as usize,
            )
        } else {
            (
                lower[index] - lower[target],
                upper[index] - upper[target],
                i16::MIN.unsigned_abs() as usize,
            )
        };
        if max_distance <= limit {
            forms[index] = BranchForm::Short;
            changed = true;
        } else if min_distance > limit {
            forms[index] = BranchForm::Wide;
            changed = true;
        }
    }
    changed
}

/// Exact offsets for a fully decided layout
fn exact_offsets(items: &[Sizing], forms: &[BranchForm]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(items.len() + 1);
    let mut offset = 0;
    for (sizing, form) in items.iter().zip(forms) {
        offsets.push(offset);
        offset += match (sizing, form) {
            (Sizing::Switch { payload }, _) => 1 + switch_padding(offset) + payload,
            (sizing, form) => length_bounds(sizing, *form).0,
        };
    }
    offsets.push(offset);
    offsets
}

/// Lay out a method body, given how each instruction's length depends on the layout
pub fn resolve_layout(items: &[Sizing]) -> Result<Layout, Error> {
    let mut forms = vec![BranchForm::Undecided; items.len()];
    let mut passes = 0;

    loop {
        passes += 1;
        if relax_step(items, &mut forms) {
            continue;
        }

        // Nothing left to learn from the bounds: try the undecided branches short
        let undecided: Vec<usize> = (0..items.len())
            .filter(|index| forms[*index] == BranchForm::Undecided)
            .collect();
        let mut tentative = forms.clone();
        for index in &undecided {
            tentative[*index] = BranchForm::Short;
        }
        let offsets = exact_offsets(items, &tentative);

        let mut widened = false;
        for index in undecided {
            if let Sizing::Branch { target, .. } = items[index] {
                let distance = offsets[target] as isize - offsets[index] as isize;
                if !fits_short(distance) {
                    forms[index] = BranchForm::Wide;
                    widened = true;
                }
            }
        }
        if widened {
            continue;
        }

        let code_length = offsets.last().copied().unwrap_or(0);
        log::debug!(
            "laid out {} instructions in {} bytes ({} passes)",
            items.len(),
            code_length,
            passes
        );
        if code_length > MAX_CODE_LENGTH {
            return Err(Error::MethodCodeOverflow(Offset(code_length)));
        }
        return Ok(Layout {
            offsets,
            forms: tentative,
            passes,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn goto(target: usize) -> Sizing {
        Sizing::Branch {
            target,
            short: 3,
            wide: 5,
        }
    }

    fn ifeq(target: usize) -> Sizing {
        Sizing::Branch {
            target,
            short: 3,
            wide: 8,
        }
    }

    #[test]
    fn short_jumps() {
        let items = vec![
            Sizing::Fixed(1),
            ifeq(4),
            Sizing::Fixed(2),
            goto(0),
            Sizing::Fixed(1),
        ];
        let layout = resolve_layout(&items).unwrap();
        assert_eq!(layout.offsets, vec![0, 1, 4, 6, 9, 10]);
        assert!(!layout.is_wide(1));
        assert!(!layout.is_wide(3));
        assert_eq!(layout.code_length(), 10);
    }

    #[test]
    fn long_forward_goto() {
        let mut items = vec![goto(1 + 40_000)];
        items.extend(std::iter::repeat(Sizing::Fixed(1)).take(40_000));
        items.push(Sizing::Fixed(1));

        let layout = resolve_layout(&items).unwrap();
        assert_eq!(layout.forms[0], BranchForm::Wide);
        assert_eq!(layout.offsets[1], 5);
        assert_eq!(layout.code_length(), 5 + 40_000 + 1);
    }

    #[test]
    fn widening_cascades() {
        // The forward branch only needs to be wide because the backward one is
        let items = vec![
            Sizing::Fixed(100),
            ifeq(4),
            Sizing::Fixed(32_758),
            ifeq(0),
            Sizing::Fixed(1),
        ];
        let layout = resolve_layout(&items).unwrap();
        assert_eq!(layout.forms[3], BranchForm::Wide);
        assert_eq!(layout.forms[1], BranchForm::Wide);
        assert_eq!(layout.code_length(), 100 + 8 + 32_758 + 8 + 1);
        assert!(layout.passes <= 3);
    }

    #[test]
    fn bounds_only_tighten() {
        let mut items = vec![];
        for idx in 0..20 {
            items.push(ifeq(40));
            items.push(Sizing::Fixed(2_000));
        }
        items.push(Sizing::Fixed(1));
        let branches = 20;

        let mut forms = vec![BranchForm::Undecided; items.len()];
        let mut passes = 0;
        loop {
            let before = forms.clone();
            let changed = relax_step(&items, &mut forms);
            passes += 1;
            for (old, new) in before.iter().zip(&forms) {
                assert!(*old == BranchForm::Undecided || old == new);
            }
            if !changed {
                break;
            }
        }
        assert!(passes <= branches + 1);

        let layout = resolve_layout(&items).unwrap();
        assert!(layout.passes <= branches + 2);
    }

    #[test]
    fn switch_padding_depends_on_offset() {
        let items = vec![
            Sizing::Fixed(2),
            Sizing::Switch { payload: 16 },
            Sizing::Fixed(1),
        ];
        let layout = resolve_layout(&items).unwrap();
        assert_eq!(layout.offsets, vec![0, 2, 2 + 1 + 1 + 16, 21]);
        assert_eq!(switch_padding(0), 3);
        assert_eq!(switch_padding(3), 0);
    }

    #[test]
    fn too_long() {
        let items = vec![Sizing::Fixed(40_000), Sizing::Fixed(40_000)];
        assert!(matches!(
            resolve_layout(&items),
            Err(Error::MethodCodeOverflow(Offset(80_000)))
        ));
    }
}
