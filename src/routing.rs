use crate::error::{ProjectionError, Result};
use crate::projection::{HeaderKey, HeaderProjector, MissingHeaderPolicy};
use crate::transform::{Message, MessageTransformer};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

pub const ENA_FTP_DIR_ROUTE: &str = "ena-ftp-dir";
pub const SEQ_REPORT_PATH_ROUTE: &str = "seq-report-path";

/// One `route=headerKey` entry of the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub route: String,
    pub key: HeaderKey,
}

impl RouteSpec {
    pub fn new(route: impl Into<String>, key: HeaderKey) -> Self {
        Self {
            route: route.into(),
            key,
        }
    }

    /// The two built-in routes of the sequence report download pipeline.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(ENA_FTP_DIR_ROUTE, HeaderKey::ENA_FTP_SEQ_REP_DIR),
            Self::new(SEQ_REPORT_PATH_ROUTE, HeaderKey::SEQ_REPORT_LOCAL_PATH),
        ]
    }

    /// Parse a comma separated list such as `a=headerA, b=headerB`.
    /// Empty entries are skipped.
    ///
    /// # Errors
    /// Returns [`ProjectionError::InvalidRoute`] for any malformed entry.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        s.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::from_str)
            .collect()
    }
}

impl FromStr for RouteSpec {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ProjectionError::InvalidRoute(s.to_string());

        let (route, key) = s.split_once('=').ok_or_else(invalid)?;
        let (route, key) = (route.trim(), key.trim());
        if route.is_empty() || key.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(route, HeaderKey::new(key)))
    }
}

/// Explicit route name to projector table, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: BTreeMap<String, HeaderProjector>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_routes(on_missing: MissingHeaderPolicy) -> Self {
        let mut table = Self::new();
        for spec in RouteSpec::defaults() {
            table
                .routes
                .insert(spec.route, HeaderProjector::new(spec.key, on_missing));
        }
        table
    }

    /// # Errors
    /// Returns [`ProjectionError::DuplicateRoute`] if a route name appears twice.
    pub fn from_routes(
        specs: impl IntoIterator<Item = RouteSpec>,
        on_missing: MissingHeaderPolicy,
    ) -> Result<Self> {
        let mut table = Self::new();
        for spec in specs {
            table.register(spec.route, HeaderProjector::new(spec.key, on_missing))?;
        }
        Ok(table)
    }

    /// # Errors
    /// Returns [`ProjectionError::DuplicateRoute`] if `route` is already registered.
    pub fn register(&mut self, route: impl Into<String>, projector: HeaderProjector) -> Result<()> {
        let route = route.into();
        if self.routes.contains_key(&route) {
            return Err(ProjectionError::DuplicateRoute(route));
        }
        self.routes.insert(route, projector);
        Ok(())
    }

    pub fn get(&self, route: &str) -> Option<&HeaderProjector> {
        self.routes.get(route)
    }

    pub fn routes(&self) -> impl Iterator<Item = (&str, &HeaderProjector)> {
        self.routes.iter().map(|(route, p)| (route.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Project `msg` with the projector registered for `route`.
    ///
    /// # Errors
    /// Returns [`ProjectionError::UnknownRoute`] if nothing is registered for
    /// `route`, or whatever the projector itself reports.
    pub fn project(&self, route: &str, msg: &Message<'_>) -> Result<Message<'static>> {
        let projector = self
            .get(route)
            .ok_or_else(|| ProjectionError::UnknownRoute(route.to_string()))?;

        debug!(
            event = "header_projected",
            route = route,
            header = %projector.key(),
            "Projecting header into payload"
        );

        projector.project(msg)
    }
}

#[async_trait]
impl MessageTransformer for RoutingTable {
    async fn transform<'a>(&self, input: Message<'a>) -> anyhow::Result<Message<'a>> {
        Ok(self.project(&input.route, &input)?)
    }
}
