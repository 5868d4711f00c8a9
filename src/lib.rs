//! # Async Wars
//!
//! This library demonstrates several ways of moving a blocking operation (an image download,
//! a Fibonacci computation) off a single designated UI thread and marshalling the result back
//! onto it, with cleanup tied to the lifecycle of the screen that started the work.
//!
//! ## Key Features
//! - **Single UI context**: [`ui::UiLoop`] owns one thread and a `kanal` queue of closures. Only
//!   closures posted there touch screen state.
//! - **Strategy per dispatch**: [`dispatcher::TaskDispatcher::dispatch`] takes a
//!   [`work::WorkUnit`], an [`strategy::ExecutionStrategy`] and a [`work::ResultSink`], and
//!   returns a [`handle::DispatchHandle`] without waiting for the work.
//! - **At-most-once delivery**: sinks are consumed when invoked, and results arriving after the
//!   owning screen is torn down are dropped.
//! - **Owned resources**: worker loops, pools, subscriptions and coroutine scopes belong to the
//!   dispatcher and are released by an idempotent teardown.
//!
//! ## Overview of Strategies
//!
//! #### `Blocking`
//! Runs the work on the calling thread, then runs the sink on the UI loop before returning.
//! Exists only to show what the others avoid.
//!
//! #### `DirectThread` / `PostedToOwnedLoop`
//! A new named OS thread per dispatch; the outcome is posted to the UI loop.
//!
//! #### `TaskAbstraction`
//! A blocking task on the shared Tokio runtime. Cancellable.
//!
//! #### `BackgroundService`
//! A screen-independent service thread. Outcomes are published on the
//! [`broadcast::Broadcaster`] and survive the screen's destruction.
//!
//! #### `DedicatedWorkerLoop`
//! One long-lived [`worker_loop::WorkerLoop`] per screen, quit at teardown.
//!
//! #### `SharedPool`
//! A fixed-size Rayon pool per screen, released at teardown.
//!
//! #### `ReactivePipeline`
//! [`reactive::Single`] subscribed on the Tokio runtime and observed on the UI loop; the
//! returned [`reactive::Subscription`] is disposed at teardown.
//!
//! #### `Coroutine`
//! An async task in the screen's scope awaiting a blocking task. Cancellable.
//!
//! ## Usage Example
//! ```rust
//! use std::sync::{mpsc, Arc};
//! use async_wars::config::DispatcherConfig;
//! use async_wars::dispatcher::TaskDispatcher;
//! use async_wars::platform::Platform;
//! use async_wars::strategy::ExecutionStrategy;
//! use async_wars::work::{Image, ResultSink, WorkUnit};
//!
//! let platform = Arc::new(Platform::<Image>::start(DispatcherConfig::default()).unwrap());
//! let mut dispatcher = TaskDispatcher::new(platform);
//! let (tx, rx) = mpsc::channel();
//! dispatcher
//!     .dispatch(
//!         WorkUnit::new(|| Some(Image::new("A"))),
//!         ExecutionStrategy::TaskAbstraction,
//!         ResultSink::new(move |outcome| tx.send(outcome).unwrap()),
//!     )
//!     .unwrap();
//! assert_eq!(rx.recv().unwrap(), Ok(Some(Image::new("A"))));
//! ```

pub mod broadcast;
pub mod config;
pub mod dispatcher;
pub mod downloader;
pub mod error;
pub mod fibonacci;
pub mod handle;
pub mod platform;
pub mod reactive;
pub mod screen;
pub mod service;
pub mod strategy;
pub mod ui;
pub mod work;
pub mod worker_loop;

pub use error::{DispatchError, Outcome};
pub use strategy::ExecutionStrategy;
