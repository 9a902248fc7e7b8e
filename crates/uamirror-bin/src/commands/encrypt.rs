// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `gen-key` and `encrypt` subcommands: key management for the
//! password field of the connection document.

use std::io::Read;

use uamirror_config::encryption::{generate_key_base64, Encryptor};

use crate::cli::EncryptArgs;
use crate::error::{BinError, BinResult};

/// Print a fresh base64 AES-256 key.
pub fn gen_key() -> BinResult<()> {
    println!("{}", generate_key_base64());
    eprintln!();
    eprintln!("export OPCUA_PW_ENCRYPTION_KEY=<key> before running the gateway");
    Ok(())
}

/// Encrypt a password with the key from the environment and print the
/// `ENC:` value for `opcua_client_config.json`.
pub fn execute(args: &EncryptArgs) -> BinResult<()> {
    let plaintext = match &args.password {
        Some(password) => password.clone(),
        None => read_stdin()?,
    };
    if plaintext.is_empty() {
        return Err(BinError::init("password must not be empty"));
    }

    let encryptor = Encryptor::from_env()?;
    let encrypted = encryptor.encrypt(&plaintext)?;
    println!("{encrypted}");
    Ok(())
}

fn read_stdin() -> BinResult<String> {
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer.trim_end_matches(['\r', '\n']).to_string())
}
