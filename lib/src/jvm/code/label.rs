use crate::jvm::verifier::{Frame, FrameElement, StackFrame};
use crate::jvm::{Diagnostics, Error, VerifierErrorKind};
use std::collections::HashMap;
use std::fmt;

/// Opaque label, only meaningful for the `Labels` that created it
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct LabelId(usize);

impl LabelId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for LabelId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "L{}", self.0)
    }
}

/// How much is known about the frame at a label
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LabelState {
    /// Neither placed nor jumped to
    Unseen,

    /// Jumped to (from before the label) and the frames of those jumps joined
    FrameRecorded,

    /// Placed: later jumps must agree with the frame, they can no longer change it
    Frozen,
}

#[derive(Debug)]
struct LabelData {
    name: String,
    state: LabelState,
    frame: Option<Frame>,
    position: Option<usize>,
}

/// All the labels of a method, with the frames recorded for them
#[derive(Debug, Default)]
pub struct Labels {
    labels: Vec<LabelData>,
    by_name: HashMap<String, LabelId>,
}

impl Labels {
    pub fn new() -> Labels {
        Labels::default()
    }

    /// Label with the given name, created if it doesn't exist yet
    pub fn get_or_create(&mut self, name: &str) -> LabelId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = LabelId(self.labels.len());
        self.labels.push(LabelData {
            name: name.to_owned(),
            state: LabelState::Unseen,
            frame: None,
            position: None,
        });
        self.by_name.insert(name.to_owned(), id);
        id
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn name(&self, id: LabelId) -> &str {
        &self.labels[id.0].name
    }

    pub fn state(&self, id: LabelId) -> LabelState {
        self.labels[id.0].state
    }

    /// Index of the instruction the label is placed before
    pub fn position(&self, id: LabelId) -> Option<usize> {
        self.labels[id.0].position
    }

    pub fn frame(&self, id: LabelId) -> Option<&Frame> {
        self.labels[id.0].frame.as_ref()
    }

    /// Names of labels that were referred to but never placed
    pub fn undefined(&self) -> impl Iterator<Item = &str> {
        self.labels
            .iter()
            .filter(|label| label.position.is_none())
            .map(|label| label.name.as_str())
    }

    /// Every label with its position, in creation order
    pub fn positions(&self) -> impl Iterator<Item = (LabelId, &str, Option<usize>)> {
        self.labels
            .iter()
            .enumerate()
            .map(|(idx, label)| (LabelId(idx), label.name.as_str(), label.position))
    }

    /// Record a jump (or exception edge) to a label from a point with the given frame
    pub fn record_branch(&mut self, id: LabelId, incoming: &Frame, diagnostics: &mut Diagnostics) {
        let label = &mut self.labels[id.0];
        let frozen = label.state == LabelState::Frozen;
        let recorded = match label.frame.as_mut() {
            Some(recorded) if label.state != LabelState::Unseen => recorded,
            _ => {
                log::trace!("recording frame for {}: {:?}", label.name, incoming);
                label.frame = Some(incoming.clone());
                if !frozen {
                    label.state = LabelState::FrameRecorded;
                }
                return;
            }
        };

        if frozen {
            let joined = recorded.locals.combine(&incoming.locals);
            if !joined.is_equivalent(&recorded.locals) {
                diagnostics.error(VerifierErrorKind::IncompatibleFrames {
                    label: label.name.clone(),
                    found: incoming.locals.slots().to_vec(),
                    recorded: recorded.locals.slots().to_vec(),
                });
            }
        } else {
            recorded.locals = recorded.locals.combine(&incoming.locals);
        }
        check_stacks(&label.name, &incoming.stack, &recorded.stack, diagnostics);
    }

    /// Place a label before the instruction at `position`
    ///
    /// `incoming` is the frame falling through from the previous instruction (`None` if that
    /// instruction doesn't continue to the next one). Returns the frame to continue with: the
    /// join of the fall-through and any recorded jumps, or `None` if the label is unreachable so
    /// far. In that last case, the caller must supply a frame with `set_frame`.
    pub fn place(
        &mut self,
        id: LabelId,
        position: usize,
        incoming: Option<Frame>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<Frame>, Error> {
        let label = &mut self.labels[id.0];
        if label.state == LabelState::Frozen {
            return Err(Error::DuplicateLabel(label.name.clone()));
        }
        label.position = Some(position);
        label.state = LabelState::Frozen;

        let frame = match (incoming, label.frame.take()) {
            (Some(incoming), Some(recorded)) => {
                check_stacks(&label.name, &incoming.stack, &recorded.stack, diagnostics);
                Some(Frame {
                    locals: recorded.locals.combine(&incoming.locals),
                    stack: recorded.stack,
                })
            }
            (Some(frame), None) | (None, Some(frame)) => Some(frame),
            (None, None) => None,
        };
        label.frame = frame.clone();
        Ok(frame)
    }

    /// Frame for a placed label that had no way to compute one
    pub fn set_frame(&mut self, id: LabelId, frame: Frame) {
        self.labels[id.0].frame = Some(frame);
    }
}

/// Operand stacks must agree exactly at merge points (apart from already-reported errors)
fn check_stacks(
    label: &str,
    found: &StackFrame,
    recorded: &StackFrame,
    diagnostics: &mut Diagnostics,
) {
    let agree = found.len() == recorded.len()
        && found.iter().zip(recorded.iter()).all(|((_, _, a), (_, _, b))| {
            a == b || *a == FrameElement::Error || *b == FrameElement::Error
        });
    if !agree {
        let elements = |stack: &StackFrame| -> Vec<FrameElement> {
            stack.iter().map(|(_, _, elem)| elem.clone()).collect()
        };
        diagnostics.error(VerifierErrorKind::IncompatibleFrames {
            label: label.to_owned(),
            found: elements(found),
            recorded: elements(recorded),
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::verifier::LocalFrame;
    use FrameElement::*;
    use crate::jvm::Error;

    fn frame(locals: Vec<FrameElement>, stack: Vec<FrameElement>) -> Frame {
        Frame {
            locals: LocalFrame::from_values(locals),
            stack: stack.into_iter().collect(),
        }
    }

    #[test]
    fn forward_jumps_join() {
        let mut diagnostics = Diagnostics::new();
        let mut labels = Labels::new();
        let target = labels.get_or_create("loop");
        assert_eq!(labels.get_or_create("loop"), target);
        assert_eq!(labels.state(target), LabelState::Unseen);

        labels.record_branch(target, &frame(vec![Integer, Float], vec![]), &mut diagnostics);
        assert_eq!(labels.state(target), LabelState::FrameRecorded);
        labels.record_branch(target, &frame(vec![Integer, Integer], vec![]), &mut diagnostics);

        let placed = labels
            .place(target, 3, Some(frame(vec![Integer], vec![])), &mut diagnostics)
            .unwrap();
        assert_eq!(placed, Some(frame(vec![Integer], vec![])));
        assert_eq!(labels.state(target), LabelState::Frozen);
        assert_eq!(labels.position(target), Some(3));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn stacks_must_agree() {
        let mut diagnostics = Diagnostics::new();
        let mut labels = Labels::new();
        let target = labels.get_or_create("join");
        labels.record_branch(target, &frame(vec![], vec![Integer]), &mut diagnostics);
        labels.record_branch(target, &frame(vec![], vec![Float]), &mut diagnostics);
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn backward_jumps_cannot_change_frozen_frames() {
        let mut diagnostics = Diagnostics::new();
        let mut labels = Labels::new();
        let target = labels.get_or_create("top");
        labels
            .place(target, 0, Some(frame(vec![Integer], vec![])), &mut diagnostics)
            .unwrap();

        // Extra locals are fine, they are dropped by the join
        labels.record_branch(target, &frame(vec![Integer, Long], vec![]), &mut diagnostics);
        assert!(diagnostics.is_empty());

        labels.record_branch(target, &frame(vec![Float], vec![]), &mut diagnostics);
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn unreachable_and_duplicate_labels() {
        let mut diagnostics = Diagnostics::new();
        let mut labels = Labels::new();
        let target = labels.get_or_create("dead");
        assert_eq!(labels.place(target, 4, None, &mut diagnostics).unwrap(), None);
        assert!(matches!(
            labels.place(target, 5, None, &mut diagnostics),
            Err(Error::DuplicateLabel(name)) if name == "dead"
        ));

        let missing = labels.get_or_create("missing");
        assert_eq!(labels.undefined().collect::<Vec<_>>(), vec!["missing"]);
        assert_eq!(labels.name(missing), "missing");
    }
}
