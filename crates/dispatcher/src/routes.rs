//! RouteTable - which transform handles which bucket, writing where
//!
//! Built once at startup. Routes sharing `(source bucket, transform, kind)`
//! are merged: the transform runs once per item and its output lands in
//! every member's destination through a `SplitSink`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use contracts::{
    DocumentSink, Notifier, RouteSettings, Transform, TransformKind, TransformRegistry, WorkItem,
};
use tracing::{debug, info, instrument};

use crate::error::DispatcherError;
use crate::registry::SinkRegistry;
use crate::sinks::SplitSink;

/// One configured route after sink and notifier resolution
#[derive(Clone)]
pub struct RouteMember {
    /// Route name from the settings
    pub name: String,
    /// Destination name used by `WorkItem::destination`
    pub destination: String,
    pub sink: Arc<dyn DocumentSink>,
    pub notify: Vec<Arc<dyn Notifier>>,
}

/// A dispatchable route: one transform, one or more destinations
#[derive(Clone)]
pub struct Route {
    name: String,
    source_bucket: String,
    source_extension: String,
    transform_id: String,
    transform: Arc<dyn Transform>,
    kind: TransformKind,
    members: Vec<RouteMember>,
    sink: Arc<dyn DocumentSink>,
    notify: Vec<Arc<dyn Notifier>>,
}

impl Route {
    fn new(
        first: &RouteSettings,
        transform: Arc<dyn Transform>,
        members: Vec<RouteMember>,
    ) -> Option<Self> {
        let template = RouteTemplate {
            source_bucket: first.source.bucket.clone(),
            source_extension: first.source.extension.clone(),
            transform_id: first.transform.clone(),
            transform,
            kind: first.transform_kind,
        };
        template.with_members(members)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_bucket(&self) -> &str {
        &self.source_bucket
    }

    pub fn source_extension(&self) -> &str {
        &self.source_extension
    }

    pub fn transform_id(&self) -> &str {
        &self.transform_id
    }

    pub fn transform(&self) -> &Arc<dyn Transform> {
        &self.transform
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    pub fn members(&self) -> &[RouteMember] {
        &self.members
    }

    /// Destination sink, a `SplitSink` for merged routes
    pub fn sink(&self) -> &Arc<dyn DocumentSink> {
        &self.sink
    }

    pub fn notify(&self) -> &[Arc<dyn Notifier>] {
        &self.notify
    }

    /// Same route restricted to members writing to `destination`
    pub fn narrow(&self, destination: &str) -> Option<Route> {
        let members: Vec<RouteMember> = self
            .members
            .iter()
            .filter(|m| m.destination == destination)
            .cloned()
            .collect();

        if members.len() == self.members.len() {
            return Some(self.clone());
        }

        RouteTemplate {
            source_bucket: self.source_bucket.clone(),
            source_extension: self.source_extension.clone(),
            transform_id: self.transform_id.clone(),
            transform: Arc::clone(&self.transform),
            kind: self.kind,
        }
        .with_members(members)
    }
}

/// Route fields shared by all members
struct RouteTemplate {
    source_bucket: String,
    source_extension: String,
    transform_id: String,
    transform: Arc<dyn Transform>,
    kind: TransformKind,
}

impl RouteTemplate {
    /// `None` if there are no members
    fn with_members(self, members: Vec<RouteMember>) -> Option<Route> {
        let sink = SplitSink::fold(members.iter().map(|m| Arc::clone(&m.sink)))?;

        let mut notify: Vec<Arc<dyn Notifier>> = Vec::new();
        for target in members.iter().flat_map(|m| &m.notify) {
            if !notify.iter().any(|n| n.name() == target.name()) {
                notify.push(Arc::clone(target));
            }
        }

        let name = members
            .iter()
            .map(|m| m.name.as_str())
            .collect::<Vec<_>>()
            .join("+");

        Some(Route {
            name,
            source_bucket: self.source_bucket,
            source_extension: self.source_extension,
            transform_id: self.transform_id,
            transform: self.transform,
            kind: self.kind,
            members,
            sink,
            notify,
        })
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("source_bucket", &self.source_bucket)
            .field("transform", &self.transform_id)
            .field("kind", &self.kind)
            .field("sink", &self.sink.name())
            .field("notify", &self.notify.iter().map(|n| n.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Resolves notify settings to notifiers
pub trait NotifierFactory {
    fn notifier(
        &self,
        route: &str,
        queue: &str,
        bucket: &str,
    ) -> Result<Arc<dyn Notifier>, DispatcherError>;
}

/// Immutable routing table
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Resolve and merge route settings
    ///
    /// # Errors
    /// - `UnknownTransform` if a route names an unregistered transform
    /// - sink creation and notifier errors
    #[instrument(
        name = "route_table_build",
        skip_all,
        fields(routes = settings.len())
    )]
    pub fn build(
        settings: &[RouteSettings],
        transforms: &TransformRegistry,
        sinks: &SinkRegistry,
        notifiers: &dyn NotifierFactory,
    ) -> Result<Self, DispatcherError> {
        let mut order: Vec<(String, String, TransformKind)> = Vec::new();
        let mut groups: HashMap<(String, String, TransformKind), Vec<&RouteSettings>> =
            HashMap::new();

        for route in settings {
            if !transforms.contains(&route.transform) {
                return Err(DispatcherError::UnknownTransform {
                    route: route.name.clone(),
                    transform: route.transform.clone(),
                });
            }

            let key = (
                route.source.bucket.clone(),
                route.transform.clone(),
                route.transform_kind,
            );
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(route);
        }

        let mut routes = Vec::with_capacity(order.len());
        for key in order {
            let group = groups.remove(&key).unwrap_or_default();
            let Some(first) = group.first().copied() else {
                continue;
            };
            let Some(transform) = transforms.get(&first.transform) else {
                return Err(DispatcherError::UnknownTransform {
                    route: first.name.clone(),
                    transform: first.transform.clone(),
                });
            };

            let mut members = Vec::with_capacity(group.len());
            for route in &group {
                let notify = route
                    .notify
                    .iter()
                    .map(|target| notifiers.notifier(&route.name, &target.queue, &target.bucket))
                    .collect::<Result<Vec<_>, _>>()?;
                members.push(RouteMember {
                    name: route.name.clone(),
                    destination: route.destination.name().to_string(),
                    sink: sinks.get_or_create(&route.destination)?,
                    notify,
                });
            }

            if let Some(route) = Route::new(first, transform, members) {
                if route.members.len() > 1 {
                    info!(route = %route.name, sink = %route.sink.name(), "Routes merged");
                }
                debug!(?route, "Route ready");
                routes.push(route);
            }
        }

        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes handling `item`, narrowed to its destination if it names one
    pub fn matching(&self, item: &WorkItem) -> Vec<Route> {
        self.routes
            .iter()
            .filter(|route| route.source_bucket == item.bucket)
            .filter_map(|route| match &item.destination {
                Some(destination) => route.narrow(destination),
                None => Some(route.clone()),
            })
            .collect()
    }
}
