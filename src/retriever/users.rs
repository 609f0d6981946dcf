use log::{debug, info, warn};
use serde_json::Value;

use super::{RepoRetriever, RetrieveResult, non_empty};
use crate::store::Selector;
use crate::store::collections::{FOLLOWERS, USERS};

fn user_type(doc: &Value) -> &'static str {
    match doc.get("type").and_then(Value::as_str) {
        Some("Organization") => "org",
        _ => "user",
    }
}

fn login(doc: &Value) -> Option<&str> {
    doc.get("login").and_then(Value::as_str)
}

impl RepoRetriever {
    pub async fn retrieve_user_byusername(&self, user: &str) -> RetrieveResult<Option<Value>> {
        if let Some(stored) = self.docs.find_one(USERS, &Selector::new().eq("login", user)).await? {
            debug!("{} {user} exists", user_type(&stored));
            return Ok(Some(stored));
        }

        let url = self.client.ghurl(&format!("users/{user}"));
        let Some(found) = non_empty(self.client.api_request(&url, None).await?) else {
            return Ok(None);
        };
        self.docs.store(USERS, &found).await?;
        info!("Added {} {user}", user_type(&found));
        Ok(Some(found))
    }

    /// Look a user up by email, falling back to a name search when the
    /// name has more than one word. Optional data: `None` is common.
    pub async fn retrieve_user_byemail(&self, email: &str, name: Option<&str>) -> RetrieveResult<Option<Value>> {
        let url = self
            .client
            .ghurl(&format!("legacy/user/email/{}", urlencoding::encode(email)));
        let by_email = self.client.api_request(&url, None).await?;

        if let Some(user) = by_email.as_ref().and_then(|b| b.get("user")).filter(|u| u.is_object()) {
            return match login(user) {
                None => {
                    self.docs.store(USERS, user).await?;
                    info!("Added {} {user}", user_type(user));
                    Ok(Some(user.clone()))
                }
                Some(login) => {
                    info!("Added user {login} retrieved by email {email}");
                    self.retrieve_user_byusername(login).await
                }
            };
        }

        let Some(name) = name.filter(|n| n.split(' ').count() > 1) else {
            return Ok(None);
        };
        let url = self
            .client
            .ghurl(&format!("legacy/user/search/{}", urlencoding::encode(name)));
        let candidates = self
            .client
            .api_request(&url, None)
            .await?
            .and_then(|b| b.get("users").and_then(Value::as_array).cloned())
            .unwrap_or_default();
        if candidates.is_empty() {
            return Ok(None);
        }

        for candidate in &candidates {
            if candidate.get("name").and_then(Value::as_str) != Some(name) {
                continue;
            }
            let Some(candidate_login) = login(candidate) else {
                continue;
            };
            if self.retrieve_user_byusername(candidate_login).await?.is_none() {
                continue;
            }
            if candidate.get("email").and_then(Value::as_str) == Some(email) {
                return Ok(Some(candidate.clone()));
            }
            break;
        }
        warn!("Could not find user {email}");
        Ok(None)
    }

    /// Store every follower of `user` as a `{follows: user, login}` edge.
    pub async fn retrieve_user_followers(&self, user: &str) -> RetrieveResult<Vec<Value>> {
        let url = self.client.ghurl(&format!("users/{user}/followers"));
        for mut follower in self.client.paged_request(&url, -1).await? {
            let Some(follower_login) = login(&follower).map(str::to_string) else {
                continue;
            };
            let edge = Selector::new().eq("follows", user).eq("login", follower_login.as_str());
            if self.docs.exists(FOLLOWERS, &edge).await? {
                debug!("Follower {user} -> {follower_login} exists");
                continue;
            }
            if let Some(map) = follower.as_object_mut() {
                map.insert("follows".to_string(), Value::from(user));
            }
            self.docs.store(FOLLOWERS, &follower).await?;
            info!("Added follower {user} -> {follower_login}");
        }
        Ok(self.docs.find(FOLLOWERS, &Selector::new().eq("follows", user)).await?)
    }

    pub async fn retrieve_user_follower(&self, followed: &str, follower: &str) -> RetrieveResult<Option<Value>> {
        let edge = Selector::new().eq("follows", followed).eq("login", follower);
        if let Some(stored) = self.docs.find_one(FOLLOWERS, &edge).await? {
            return Ok(Some(stored));
        }
        Ok(self
            .retrieve_user_followers(followed)
            .await?
            .into_iter()
            .find(|f| login(f) == Some(follower)))
    }

    /// Store the users `user` follows, as reversed follower edges.
    ///
    /// The first edge comes from the followed user's follower list; later
    /// edges reuse it with `follows` rewritten.
    pub async fn retrieve_user_following(&self, user: &str) -> RetrieveResult<Vec<Value>> {
        let url = self.client.ghurl(&format!("users/{user}/following"));
        let mut template: Option<Value> = None;

        for followed in self.client.paged_request(&url, -1).await? {
            let Some(followed_login) = login(&followed) else {
                continue;
            };
            let edge = Selector::new().eq("follows", followed_login).eq("login", user);

            if template.is_none() {
                template = match self.docs.find_one(FOLLOWERS, &edge).await? {
                    Some(found) => Some(found),
                    None => self
                        .retrieve_user_followers(followed_login)
                        .await?
                        .into_iter()
                        .find(|f| login(f) == Some(user)),
                };
            }

            if self.docs.exists(FOLLOWERS, &edge).await? {
                debug!("Following {user} -> {followed_login} exists");
                continue;
            }
            let Some(mut entry) = template.clone() else {
                warn!("No follower entry for {user}, skipping {followed_login}");
                continue;
            };
            if let Some(map) = entry.as_object_mut() {
                map.insert("follows".to_string(), Value::from(followed_login));
            }
            self.docs.store(FOLLOWERS, &entry).await?;
            info!("Added following {user} -> {followed_login}");
        }

        Ok(self.docs.find(FOLLOWERS, &Selector::new().eq("login", user)).await?)
    }
}
