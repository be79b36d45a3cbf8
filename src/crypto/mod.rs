// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Encryption
//!
//! Cluster credentials (service-account tokens, kubeconfigs) are sealed with
//! AES-256-GCM before they reach the database. The stored blob layout is:
//!
//! ```text
//! +----------------+---------------------+-------------------+
//! | nonce (12 B)   | ciphertext (n B)    | auth tag (16 B)   |
//! +----------------+---------------------+-------------------+
//! ```
//!
//! Text columns carry the same blob base64-encoded.

pub mod encryptor;

pub use encryptor::{CryptoError, Encryptor, NONCE_LEN, TAG_LEN};
