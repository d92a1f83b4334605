//! Access-denial handling and redirect recovery.
//!
//! A denied batch moves the session through
//! `Normal → Denied → Recovering (router | hard navigation) → Normal`:
//! a target route is picked from the response's and the session's security
//! settings, the router is tried first, and a hard navigation is the
//! fallback when the router is missing or fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::BridgeResult;

/// A navigation target: a path, or a structured route the router resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteTarget {
    Path(String),
    Named(Value),
}

impl RouteTarget {
    /// Reads a target from a JSON value. `null` and booleans are not targets.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(path) => Some(Self::Path(path.clone())),
            Value::Object(_) => Some(Self::Named(value.clone())),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&str> {
        match self {
            Self::Path(path) => Some(path),
            Self::Named(_) => None,
        }
    }
}

impl From<&str> for RouteTarget {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

/// Session security settings. Merge-only: values pushed by the server
/// override, absent values never clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_route: Option<RouteTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthorized_route: Option<RouteTarget>,
    /// A route, or `true` to redirect to the configured login/unauthorized route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_security: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_denied_components: Option<Vec<String>>,
}

impl SecurityState {
    pub fn with_login_route(mut self, route: impl Into<RouteTarget>) -> Self {
        self.login_route = Some(route.into());
        self
    }

    pub fn with_unauthorized_route(mut self, route: impl Into<RouteTarget>) -> Self {
        self.unauthorized_route = Some(route.into());
        self
    }

    /// Merges server-pushed values into this state.
    pub fn merge(&mut self, incoming: &SecurityState) {
        if incoming.login_route.is_some() {
            self.login_route = incoming.login_route.clone();
        }
        if incoming.unauthorized_route.is_some() {
            self.unauthorized_route = incoming.unauthorized_route.clone();
        }
        if incoming.redirect.is_some() {
            self.redirect = incoming.redirect.clone();
        }
        if incoming.component_security.is_some() {
            self.component_security = incoming.component_security;
        }
        if incoming.access_denied_components.is_some() {
            self.access_denied_components = incoming.access_denied_components.clone();
        }
    }

    /// Whether this block asks for a redirect.
    pub fn wants_redirect(&self) -> bool {
        match &self.redirect {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// Explicit redirect target, if the redirect names one.
    pub fn redirect_target(&self) -> Option<RouteTarget> {
        self.redirect.as_ref().and_then(RouteTarget::from_value)
    }
}

impl From<String> for RouteTarget {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

/// Client-side router.
#[async_trait]
pub trait Router: Send + Sync {
    /// Navigates within the application.
    async fn push(&self, target: &RouteTarget) -> BridgeResult<()>;

    /// Resolves a structured target to an href.
    fn resolve(&self, target: &RouteTarget) -> Option<String>;
}

/// Full-page navigation (assigning the page location).
pub trait Navigator: Send + Sync {
    fn assign(&self, href: &str);
}

/// How a recovery ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// No target route configured; nothing happened.
    Stayed,
    /// The router navigated.
    Routed(RouteTarget),
    /// A hard navigation to the href was performed.
    Navigated(String),
}

/// Picks the redirect target for a denial with `status`.
///
/// Values in the response's security block take precedence over the
/// session's. A 401 prefers the login route; otherwise the unauthorized
/// route is used, falling back to the login route.
pub fn select_target(
    status: u16,
    response: Option<&SecurityState>,
    session: &SecurityState,
) -> Option<RouteTarget> {
    let login = response
        .and_then(|s| s.login_route.clone())
        .or_else(|| session.login_route.clone());
    let unauthorized = response
        .and_then(|s| s.unauthorized_route.clone())
        .or_else(|| session.unauthorized_route.clone());

    if status == 401 && login.is_some() {
        return login;
    }
    unauthorized.or(login)
}

/// Navigates to `target`: router first, hard navigation as fallback.
pub async fn recover(
    target: Option<RouteTarget>,
    router: Option<&dyn Router>,
    navigator: Option<&dyn Navigator>,
) -> Recovery {
    let Some(target) = target else {
        return Recovery::Stayed;
    };

    if let Some(router) = router {
        match router.push(&target).await {
            Ok(()) => {
                info!("Redirected via router to {:?}", target);
                return Recovery::Routed(target);
            }
            Err(e) => warn!("Router navigation failed, falling back to hard navigation: {}", e),
        }
    }

    let href = match &target {
        RouteTarget::Path(path) => path.clone(),
        RouteTarget::Named(_) => router
            .and_then(|r| r.resolve(&target))
            .unwrap_or_else(|| "/".to_string()),
    };

    match navigator {
        Some(navigator) => {
            info!("Hard navigation to {}", href);
            navigator.assign(&href);
        }
        None => warn!("No navigator configured, cannot navigate to {}", href),
    }
    Recovery::Navigated(href)
}

/// Test doubles for the router and navigator.
pub mod mock {
    use super::*;
    use crate::error::BridgeError;
    use std::sync::Mutex;

    /// Records pushes; optionally fails every push.
    #[derive(Debug, Default)]
    pub struct MockRouter {
        pushes: Mutex<Vec<RouteTarget>>,
        fail: bool,
        resolved_href: Option<String>,
    }

    impl MockRouter {
        pub fn new() -> Self {
            Self::default()
        }

        /// A router whose pushes always fail.
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        /// Href returned by `resolve` for structured targets.
        pub fn resolving_to(mut self, href: impl Into<String>) -> Self {
            self.resolved_href = Some(href.into());
            self
        }

        pub fn pushes(&self) -> Vec<RouteTarget> {
            self.pushes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Router for MockRouter {
        async fn push(&self, target: &RouteTarget) -> BridgeResult<()> {
            self.pushes.lock().unwrap().push(target.clone());
            if self.fail {
                return Err(BridgeError::Navigation("route not found".into()));
            }
            Ok(())
        }

        fn resolve(&self, _target: &RouteTarget) -> Option<String> {
            self.resolved_href.clone()
        }
    }

    /// Records hard navigations.
    #[derive(Debug, Default)]
    pub struct MockNavigator {
        hrefs: Mutex<Vec<String>>,
    }

    impl MockNavigator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn hrefs(&self) -> Vec<String> {
            self.hrefs.lock().unwrap().clone()
        }
    }

    impl Navigator for MockNavigator {
        fn assign(&self, href: &str) {
            self.hrefs.lock().unwrap().push(href.to_string());
        }
    }
}
