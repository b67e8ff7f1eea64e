// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime Broker Core - Instance Lifecycle Orchestration
//!
//! This crate holds the decision layer of a service broker for managed
//! Kubernetes runtimes. It accepts already-parsed broker requests, validates
//! them, records durable operations and hands their IDs to the asynchronous
//! processing queues.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Broker-protocol HTTP layer                            │
//! │                 (request parsing, status mapping)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Orchestrator (this crate)                         │
//! │   validation · quota · idempotency · suspension · account moves          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                         │                          │
//!           ▼                         ▼                          ▼
//! ┌───────────────────┐   ┌───────────────────────┐   ┌────────────────────┐
//! │      Storage      │   │  Provisioning /       │   │  Label propagation │
//! │ (SQLite / memory) │   │  Deprovisioning /     │   │ (Kubernetes API)   │
//! │                   │   │  Update queues        │   │                    │
//! └───────────────────┘   └───────────────────────┘   └────────────────────┘
//!           ▲
//!           │
//! ┌───────────────────┐
//! │  Archive worker   │
//! │ (deleted history) │
//! └───────────────────┘
//! ```
//!
//! # Operations
//!
//! | Entry point | Description |
//! |-------------|-------------|
//! | [`Orchestrator::provision`] | Create an instance or return the identical earlier request |
//! | [`Orchestrator::update`] | Reconcile the context, suspend or resume, start an update |
//! | [`Orchestrator::deprovision`] | Start removing an instance |
//! | [`Orchestrator::last_operation`] | Broker-protocol state of an operation |
//! | [`ArchiveWorker::sweep`] | Fold deleted instances into archive summaries |
//!
//! # Error Codes
//!
//! Every [`BrokerError`] carries the HTTP status the protocol layer answers
//! with:
//!
//! | Error | Status |
//! |-------|--------|
//! | `Validation` | 400 Bad Request |
//! | `Conflict` | 409 Conflict |
//! | `Gone` | 410 Gone |
//! | `AsyncRequired`, `Unprocessable` | 422 Unprocessable Entity |
//! | `InstanceNotFound`, `OperationNotFound` | 404 Not Found |
//! | `Internal` | 500 Internal Server Error |
//!
//! # Configuration
//!
//! [`Config::from_env`] reads `RUNTIME_BROKER_*` environment variables; the
//! `runtime-broker-archiver` binary additionally loads a `.env` file.

#![deny(missing_docs)]

/// Archive summaries of deleted instances and the worker producing them.
pub mod archive;

/// Configuration loaded from environment variables.
pub mod config;

/// Broker and storage error types with HTTP status mapping.
pub mod error;

/// Global account label propagation to dependent cluster resources.
pub mod labels;

/// Instances, operations and their parameters.
pub mod model;

/// Request handling for provision, update, deprovision and last operation.
pub mod orchestrator;

/// Service plan catalog.
pub mod plans;

/// Hand-off of operation IDs to asynchronous processing.
pub mod queue;

/// Bounded retry for optimistic-lock conflicts.
pub mod retry;

/// Storage traits and their SQLite and in-memory backends.
pub mod store;

/// Suspension and unsuspension on context activity changes.
pub mod suspension;

/// Provisioning and update parameter validation.
pub mod validator;

pub use archive::{ArchiveWorker, ArchiveWorkerConfig};
pub use config::{Config, ConfigError};
pub use error::{BrokerError, Result, StoreError};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use store::Storage;
