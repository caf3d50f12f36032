use super::{Instruction, LabelId};
use crate::jvm::Error;
use std::collections::BTreeMap;

/// Most bytes a switch payload can take while leaving room in a method
const MAX_SWITCH_PAYLOAD: usize = u16::MAX as usize;

/// Bytes (excluding padding) of a `tableswitch` covering `low..=high`
fn table_length(low: i32, high: i32) -> usize {
    let range = usize::try_from(high as i64 - low as i64 + 1).unwrap_or(usize::MAX);
    range.saturating_mul(4).saturating_add(13)
}

/// Bytes (excluding padding) of a `lookupswitch` with `pairs` cases
fn lookup_length(pairs: usize) -> usize {
    9 + 8 * pairs
}

/// Pick the smaller of `tableswitch` and `lookupswitch` for a set of cases
///
/// Contiguous keys always become a `tableswitch`. Otherwise, the `tableswitch` wins ties, and
/// keys missing from its range jump to `default`.
pub fn choose_switch(cases: BTreeMap<i32, LabelId>, default: LabelId) -> Result<Instruction, Error> {
    let (low, high) = match (cases.keys().next(), cases.keys().next_back()) {
        (Some(low), Some(high)) => (*low, *high),
        _ => {
            return Ok(Instruction::LookupSwitch {
                default,
                pairs: vec![],
            })
        }
    };

    let table = table_length(low, high);
    let lookup = lookup_length(cases.len());
    let contiguous = high as i64 - low as i64 + 1 == cases.len() as i64;

    if contiguous || table <= lookup {
        if table > MAX_SWITCH_PAYLOAD {
            return Err(Error::SwitchTooLarge(cases.len()));
        }
        if !contiguous {
            log::info!(
                "tableswitch ({} bytes) chosen over lookupswitch ({} bytes) for {} cases",
                table,
                lookup,
                cases.len()
            );
        }
        let targets = (low..=high)
            .map(|key| cases.get(&key).copied().unwrap_or(default))
            .collect();
        Ok(Instruction::TableSwitch {
            low,
            default,
            targets,
        })
    } else {
        if lookup > MAX_SWITCH_PAYLOAD {
            return Err(Error::SwitchTooLarge(cases.len()));
        }
        log::info!(
            "lookupswitch ({} bytes) chosen over tableswitch ({} bytes) for {} cases",
            lookup,
            table,
            cases.len()
        );
        Ok(Instruction::LookupSwitch {
            default,
            pairs: cases.into_iter().collect(),
        })
    }
}
