//! `rgap genpsk` — print a freshly generated pre-shared key.

use anyhow::Result;

use rgap_core::crypto::Psk;

pub fn run() -> Result<()> {
    println!("{}", Psk::generate().to_hex());
    Ok(())
}
