//! Offering a credential chain to the server, one method at a time.

use std::sync::Arc;

use log::{debug, info, warn};
use russh::client::{Handle, Handler, KeyboardInteractiveAuthResponse};
use russh::keys::PrivateKeyWithHashAlg;
use secrecy::ExposeSecret;

use super::prompt::{Prompter, answer_challenge};
use super::{CredentialCandidate, CredentialChain};
use crate::error::{AuthError, PromptError};

/// Offer every candidate in `chain` to the server until one succeeds.
///
/// Rejections move on to the next candidate. Only protocol errors abort
/// early; when everything is rejected the result is
/// [`AuthError::Exhausted`], recording whether a password was offered.
pub async fn authenticate<H>(
    handle: &mut Handle<H>,
    user: &str,
    chain: &mut CredentialChain,
    prompter: Arc<dyn Prompter>,
) -> Result<(), AuthError>
where
    H: Handler,
{
    let mut password_tried = false;

    for candidate in chain.iter_mut() {
        debug!("Trying {} authentication for {}", candidate.kind(), user);

        let accepted = match candidate {
            CredentialCandidate::Agent(signer) => match signer.authenticate(handle, user).await {
                Ok(accepted) => accepted,
                Err(AuthError::Ssh(e)) => return Err(AuthError::Ssh(e)),
                Err(e) => {
                    warn!("{}", e);
                    false
                }
            },

            CredentialCandidate::KeyFile { path, key } => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                debug!("Offering key {}", path.display());
                handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), hash_alg))
                    .await?
                    .success()
            }

            CredentialCandidate::Password(password) => {
                password_tried = true;
                handle
                    .authenticate_password(user, password.expose_secret())
                    .await?
                    .success()
            }

            CredentialCandidate::KeyboardInteractive => {
                match keyboard_interactive(handle, user, prompter.clone()).await {
                    Ok(accepted) => accepted,
                    Err(AuthError::Prompt(e)) => {
                        warn!("Keyboard-interactive abandoned: {}", e);
                        false
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        if accepted {
            info!("Authenticated {} with {}", user, candidate.kind());
            return Ok(());
        }
        debug!("{} authentication rejected for {}", candidate.kind(), user);
    }

    Err(AuthError::Exhausted {
        user: user.to_string(),
        password_tried,
    })
}

async fn keyboard_interactive<H>(
    handle: &mut Handle<H>,
    user: &str,
    prompter: Arc<dyn Prompter>,
) -> Result<bool, AuthError>
where
    H: Handler,
{
    let mut reply = handle
        .authenticate_keyboard_interactive_start(user, None::<String>)
        .await?;

    loop {
        match reply {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest {
                instructions,
                prompts,
                ..
            } => {
                if !instructions.is_empty() {
                    info!("{}", instructions);
                }

                let questions: Vec<(String, bool)> = prompts
                    .iter()
                    .map(|p| (p.prompt.clone(), p.echo))
                    .collect();

                let prompter = prompter.clone();
                let answers = tokio::task::spawn_blocking(move || {
                    answer_challenge(prompter.as_ref(), &questions)
                })
                .await
                .map_err(|e| PromptError::Io(std::io::Error::other(e)))??;

                reply = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await?;
            }
        }
    }
}
