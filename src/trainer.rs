//! Training and evaluation loops

use rand::Rng;

use crate::dataloader::DataLoader;
use crate::loss::NLLLoss;
use crate::nn::{Module, NNError};
use crate::optim::Optim;

/// Runs the optimization loop for `epochs` passes over the data
///
/// Every step zeros the parameter gradients, runs the forward pass, scores the
/// batch with the negative log likelihood, backpropagates, and lets the
/// optimizer update the parameters. Batches are reshuffled each epoch from the
/// given generator. Returns the mean training loss of each epoch.
pub fn fit(
    model: &dyn Module,
    loader: &DataLoader,
    optim: &mut dyn Optim,
    epochs: usize,
    rng: &mut impl Rng,
) -> Result<Vec<f32>, NNError> {
    let mut epoch_losses = Vec::with_capacity(epochs);
    for epoch in 0..epochs {
        let mut total_loss = 0.0;
        let mut n_batches = 0;
        for (batch, targets) in loader.shuffled_iter(rng) {
            // note that after the loss is freed, all the intermediate nodes (that are
            // not model parameters) are also freed because their reference count drops
            // to 0, so only the parameter gradients carry over between steps
            optim.zero_grad();
            let log_probs = model.forward(&batch)?;
            let loss = NLLLoss::call(&log_probs, &targets);
            loss.backward();
            optim.step();

            total_loss += loss.item();
            n_batches += 1;
        }
        let epoch_loss = total_loss / n_batches.max(1) as f32;
        log::info!("epoch: {}, mean loss: {:.4}", epoch + 1, epoch_loss);
        epoch_losses.push(epoch_loss);
    }
    Ok(epoch_losses)
}

/// Fraction of samples whose highest scoring class matches the label
pub fn accuracy(model: &dyn Module, loader: &DataLoader) -> Result<f32, NNError> {
    let mut n_correct = 0;
    let mut n_total = 0;
    for (batch, targets) in loader.iter() {
        let log_probs = model.forward(&batch)?;
        let predictions = log_probs.data().argmax_rows();
        n_correct += predictions
            .iter()
            .zip(targets.iter())
            .filter(|(p, t)| p == t)
            .count();
        n_total += targets.len();
    }
    Ok(n_correct as f32 / n_total.max(1) as f32)
}
