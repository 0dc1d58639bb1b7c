use std::sync::Arc;

use crate::modules::auth::interface::{AuthError, IdentityRepository, Result, UserRepository};
use crate::modules::auth::model::{FederatedIdentity, ProfileHints, Provider, User, UserId};
use crate::services::clock::Clock;

/// Maps (provider, subject) pairs to local users.
pub struct IdentityService {
    identities: Arc<dyn IdentityRepository>,
    users: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
}

impl IdentityService {
    pub fn new(
        identities: Arc<dyn IdentityRepository>,
        users: Arc<dyn UserRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identities,
            users,
            clock,
        }
    }

    /// Resolves the local owner of a provider subject, creating the user on
    /// first sign-in. Returns the user and whether it was created.
    ///
    /// A provider-verified email that already belongs to a live user links
    /// the new identity to that user instead of creating another one.
    pub async fn sign_in(&self, provider: Provider, subject: &str, hints: ProfileHints) -> Result<(User, bool)> {
        if let Some(owner) = self.identities.find_owner(provider, subject).await? {
            return Ok((owner, false));
        }

        let now = self.clock.now();

        if hints.email_verified {
            if let Some(email) = hints.email.as_deref() {
                if let Some(existing) = self.users.find_by_email(email).await? {
                    let identity =
                        FederatedIdentity::new(existing.id.clone(), provider, subject, hints.email.clone(), now);
                    return match self.identities.link(&identity).await {
                        Ok(()) => {
                            tracing::info!(user_id = %existing.id, %provider, "identity linked by verified email");
                            Ok((existing, false))
                        }
                        Err(AuthError::IdentityAlreadyLinked) => self.resolve_owner(provider, subject).await,
                        Err(e) => Err(e),
                    };
                }
            }
        }

        let user = User::federated(hints.display_name, now);
        let identity = FederatedIdentity::new(user.id.clone(), provider, subject, hints.email, now);

        match self.identities.create_user_with_identity(&user, &identity).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, %provider, "user created from federated sign-in");
                Ok((user, true))
            }
            // A concurrent sign-in for the same subject won the insert.
            Err(AuthError::IdentityAlreadyLinked) => self.resolve_owner(provider, subject).await,
            Err(e) => Err(e),
        }
    }

    async fn resolve_owner(&self, provider: Provider, subject: &str) -> Result<(User, bool)> {
        let owner = self
            .identities
            .find_owner(provider, subject)
            .await?
            .ok_or(AuthError::IdentityAlreadyLinked)?;
        tracing::debug!(user_id = %owner.id, %provider, "duplicate sign-in resolved to existing owner");
        Ok((owner, false))
    }

    /// Attaches another provider identity to an existing user. Linking a
    /// pair the user already owns is a no-op.
    pub async fn link(
        &self,
        user_id: &UserId,
        provider: Provider,
        subject: &str,
        hints: ProfileHints,
    ) -> Result<FederatedIdentity> {
        if let Some(owner) = self.identities.find_owner(provider, subject).await? {
            if &owner.id != user_id {
                return Err(AuthError::IdentityAlreadyLinked);
            }
            return self
                .identities
                .list_for_user(user_id)
                .await?
                .into_iter()
                .find(|i| i.provider == provider.as_str() && i.subject == subject)
                .ok_or(AuthError::IdentityAlreadyLinked);
        }

        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let identity = FederatedIdentity::new(user_id.clone(), provider, subject, hints.email, self.clock.now());
        self.identities.link(&identity).await?;
        tracing::info!(user_id = %user_id, %provider, "identity linked");
        Ok(identity)
    }

    pub async fn list(&self, user_id: &UserId) -> Result<Vec<FederatedIdentity>> {
        self.identities.list_for_user(user_id).await
    }
}
