//! Loss functions

use crate::var::Var;

/// Negative log likelihood loss between log probabilities and target classes
///
/// Expects each row of `log_probs` to already hold log probabilities, e.g. the
/// output of a final log-softmax layer. Averages over the rows of the batch.
pub struct NLLLoss;

impl NLLLoss {
    pub fn call(log_probs: &Var, targets: &[usize]) -> Var {
        log_probs.nll(targets)
    }
}

/// Cross entropy loss between raw logits and target classes
///
/// Log-softmax followed by the negative log likelihood, for networks whose
/// final layer emits raw logits.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn call(logits: &Var, targets: &[usize]) -> Var {
        logits.log_softmax().nll(targets)
    }
}
