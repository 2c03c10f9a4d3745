/*
[INPUT]:  Challenge text, configured account, operator input via terminal
[OUTPUT]: Accounts, network, pasted signature and public key
[POS]:    CLI wallet adapter - the operator signs with an external wallet
[UPDATE]: When the wallet capability contract or prompts change
*/

use async_trait::async_trait;
use console::style;
use dialoguer::{Input, theme::ColorfulTheme};
use siwb_auth::{AuthError, Result, SignatureScheme, WalletCapability};

/// Wallet adapter that prints the challenge and reads back the signature.
///
/// The operator signs the challenge in whatever wallet holds the key (a
/// browser extension, a hardware wallet, `bitcoin-cli signmessage`) and
/// pastes the result.
#[derive(Debug, Clone)]
pub struct ManualWallet {
    address: Option<String>,
    network: String,
}

impl ManualWallet {
    pub fn new(address: Option<String>, network: impl Into<String>) -> Self {
        Self {
            address,
            network: network.into(),
        }
    }
}

async fn prompt(label: &'static str) -> Result<String> {
    let answer = tokio::task::spawn_blocking(move || {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(label)
            .interact_text()
    })
    .await
    .map_err(|err| AuthError::UserRejected(format!("{label} prompt aborted: {err}")))?
    .map_err(|err| AuthError::UserRejected(format!("{label} prompt failed: {err}")))?;

    let answer = answer.trim().to_string();
    if answer.is_empty() {
        return Err(AuthError::UserRejected(format!("{label} left empty")));
    }
    Ok(answer)
}

#[async_trait]
impl WalletCapability for ManualWallet {
    async fn request_accounts(&self) -> Result<Vec<String>> {
        let address = match &self.address {
            Some(address) => address.clone(),
            None => prompt("Bitcoin address").await?,
        };
        Ok(vec![address])
    }

    async fn get_network(&self) -> Result<String> {
        Ok(self.network.clone())
    }

    async fn sign_message(&self, message: &str, scheme: SignatureScheme) -> Result<String> {
        println!("\n{}", style("--- Challenge ---").bold());
        println!("{message}");
        println!("{}", style("-----------------").bold());
        println!(
            "Sign the challenge above as {} ({})",
            style(scheme).cyan(),
            match scheme {
                SignatureScheme::Bip322Simple => "BIP-322 simple",
                SignatureScheme::Ecdsa => "legacy signmessage",
            }
        );
        prompt("Signature (base64)").await
    }

    async fn get_public_key(&self) -> Result<String> {
        let public_key = prompt("Public key (hex)").await?;
        hex::decode(&public_key)
            .map_err(|err| AuthError::UserRejected(format!("public key is not hex: {err}")))?;
        Ok(public_key)
    }
}
