//! A simple implementation of a neural network for handwritten digit
//! classification using the library provided by `digitnet`
//!
//! # Usage
//! Runnable via
//! ```sh
//! cargo run -- -h
//! cargo run
//! ```
//!
//! Trains a small feed-forward network on generated 8x8 digit images and
//! reports the mean training loss per epoch plus train and held-out accuracy.
//! Allows custom learning rate, momentum, optimizer, batch size, etc.

use std::fmt::{self, Display};

use clap::{Parser, ValueEnum};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use digitnet::{
    dataloader::DataLoader,
    datasets::{N_CLASSES, N_FEATURES, gen_digit_data},
    nn::{Linear, LogSoftmax, Module, ReLU, Sequential},
    optim::{Adam, Optim, SGD},
    trainer::{accuracy, fit},
};

/// Toggles between optimizers
#[derive(Debug, ValueEnum, Clone, Copy)]
enum Optimizer {
    Sgd,
    Adam,
}

impl Display for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Optimizer::Sgd => write!(f, "sgd"),
            Optimizer::Adam => write!(f, "adam"),
        }
    }
}

#[derive(Parser)]
struct Args {
    /// Training images generated per digit
    #[clap(short, long, default_value_t = 100)]
    class_size: usize,
    #[clap(short, long, default_value_t = 32)]
    batch_size: usize,
    #[clap(short, long, default_value_t = 5)]
    epochs: usize,
    #[clap(short, long, default_value_t = 0.1)]
    lr: f32,
    /// Momentum for SGD, ignored by Adam
    #[clap(short, long, default_value_t = 0.9)]
    momentum: f32,
    #[clap(short, long, default_value_t = Optimizer::Sgd)]
    optimizer: Optimizer,
    // Note that when increasing the hidden size, activation values may explode if
    // the weights are not initialized properly
    #[clap(long, default_value_t = 32)]
    hidden_units: usize,
    /// Seed for dataset generation, weight init, and batch shuffling
    #[clap(short, long, default_value_t = 42)]
    seed: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut rng = Pcg64Mcg::seed_from_u64(args.seed);

    let (train_data, train_labels) = gen_digit_data(args.class_size, &mut rng);
    let test_class_size = (args.class_size / 5).max(1);
    let (test_data, test_labels) = gen_digit_data(test_class_size, &mut rng);

    let train_loader = DataLoader::new(train_data, train_labels, args.batch_size).unwrap();
    let test_loader = DataLoader::new(test_data, test_labels, args.batch_size).unwrap();
    log::info!(
        "generated {} training and {} held-out samples",
        train_loader.n_samples(),
        test_loader.n_samples()
    );

    // One hidden layer, log probabilities over the ten digits out
    let model = Sequential::new(vec![
        Box::new(Linear::new(N_FEATURES, args.hidden_units, &mut rng)),
        Box::new(ReLU::new()),
        Box::new(Linear::new(args.hidden_units, N_CLASSES, &mut rng)),
        Box::new(LogSoftmax::new()),
    ]);

    let mut optim: Box<dyn Optim> = match args.optimizer {
        Optimizer::Sgd => Box::new(SGD::new(model.parameters(), args.lr, args.momentum)),
        Optimizer::Adam => Box::new(Adam::new(model.parameters(), args.lr)),
    };

    let losses = fit(
        &model,
        &train_loader,
        optim.as_mut(),
        args.epochs,
        &mut rng,
    )
    .unwrap();
    if let Some(final_loss) = losses.last() {
        log::info!("final mean training loss: {:.4}", final_loss);
    }

    let train_acc = accuracy(&model, &train_loader).unwrap();
    let test_acc = accuracy(&model, &test_loader).unwrap();
    log::info!(
        "train accuracy: {:.3}, held-out accuracy: {:.3}",
        train_acc,
        test_acc
    );
}
