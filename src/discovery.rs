//! Extension discovery.
//!
//! Declared extensions are resolved and their runtime closures walked. Any
//! artifact in a closure carrying the extension marker becomes an implicit
//! extension, queued and walked in turn. The worklist plus the
//! one-extension-per-coordinate rule bound the walk on cyclic graphs.

use anyhow::Result;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use crate::context::BuildContext;
use crate::coordinate::{Coordinate, DependencyNotation};
use crate::error::ConfigError;
use crate::extension::{
    Extension, ExtensionKind, ExtensionMarker, ExtensionRequest, ExtensionState, MARKER_PATH,
};
use crate::resolver::{DependencyResolver, ResolvedArtifact};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Marker probes performed during this run.
    pub probes: usize,
    /// Names of the extensions registered during this run, in order.
    pub registered: Vec<String>,
}

pub fn discover(
    ctx: &mut BuildContext,
    resolver: &dyn DependencyResolver,
    requests: impl IntoIterator<Item = ExtensionRequest>,
) -> Result<DiscoveryReport> {
    let probes_before = ctx.probe_count();
    let mut queue: VecDeque<ExtensionRequest> = requests.into_iter().collect();
    let mut queued: HashSet<Coordinate> = HashSet::new();
    let mut registered = Vec::new();

    while let Some(request) = queue.pop_front() {
        if let Some(name) = process(ctx, resolver, request, &mut queue, &mut queued)? {
            registered.push(name);
        }
    }

    Ok(DiscoveryReport {
        probes: ctx.probe_count() - probes_before,
        registered,
    })
}

fn process(
    ctx: &mut BuildContext,
    resolver: &dyn DependencyResolver,
    mut request: ExtensionRequest,
    queue: &mut VecDeque<ExtensionRequest>,
    queued: &mut HashSet<Coordinate>,
) -> Result<Option<String>> {
    let own = resolve_exactly_one(resolver, &request.name, &request.artifact)?;

    if request.kind != ExtensionKind::Declared && ctx.extensions.contains_coordinate(&own.coordinate) {
        tracing::debug!(
            extension = %request.name,
            coordinate = %own.coordinate,
            "Coordinate already claimed by another extension"
        );
        return Ok(None);
    }

    if request.kind != ExtensionKind::Declared && ctx.extensions.contains_name(&request.name) {
        request.name = own.coordinate.gav();
    }

    let explicit_deployment = request.deployment.clone();
    let name = request.name.clone();
    let extension = Extension::new(request, own.coordinate.clone());
    let id = ctx.extensions.register(extension)?;
    tracing::debug!(extension = %name, coordinate = %own.coordinate, "Extension artifact resolved");

    let mut roots = vec![own.coordinate.clone()];
    let runtime_dependencies = ctx
        .extensions
        .get(id)
        .map(|e| e.runtime_dependencies().to_vec())
        .unwrap_or_default();
    for notation in &runtime_dependencies {
        for artifact in resolve_declared(resolver, notation)? {
            if !roots.contains(&artifact.coordinate) {
                roots.push(artifact.coordinate);
            }
        }
    }

    let closure = resolver.resolve_closure(&roots)?;
    ctx.register_artifacts(&closure);

    let mut own_marker = None;
    for artifact in &closure {
        ctx.runtime.insert(&artifact.coordinate);

        if artifact.coordinate == own.coordinate {
            own_marker = ctx.probe_marker(artifact);
            if own_marker.is_none() {
                tracing::warn!(
                    extension = %name,
                    coordinate = %artifact.coordinate,
                    "Extension artifact does not define the extension marker ({MARKER_PATH})"
                );
            }
            continue;
        }

        if artifact.is_pom() || ctx.probe_marker(artifact).is_none() {
            continue;
        }
        if ctx.extensions.contains_coordinate(&artifact.coordinate)
            || !queued.insert(artifact.coordinate.clone())
        {
            continue;
        }
        tracing::debug!(
            extension = %name,
            implied = %artifact.coordinate,
            "Found implicit extension"
        );
        queue.push_back(ExtensionRequest::for_coordinate(
            artifact.coordinate.artifact(),
            ExtensionKind::Implicit,
            &artifact.coordinate,
        ));
    }

    let deployment = match explicit_deployment {
        Some(notation) => Some(resolve_exactly_one(resolver, &name, &notation)?),
        None => resolve_conventional_deployment(resolver, &own, own_marker.as_ref()),
    };
    if let Some(deployment) = deployment {
        ctx.extensions
            .attach_deployment(id, deployment.coordinate.clone())?;

        let mut deployment_roots = vec![deployment.coordinate.clone()];
        let deployment_dependencies = ctx
            .extensions
            .get(id)
            .map(|e| e.deployment_dependencies().to_vec())
            .unwrap_or_default();
        for notation in &deployment_dependencies {
            deployment_roots.extend(
                resolve_declared(resolver, notation)?
                    .into_iter()
                    .map(|a| a.coordinate),
            );
        }
        let deployment_closure = resolver.resolve_closure(&deployment_roots)?;
        ctx.locate_all(&deployment_closure);
        tracing::debug!(
            extension = %name,
            deployment = %deployment.coordinate,
            artifacts = deployment_closure.len(),
            "Deployment artifact registered"
        );
    }

    ctx.extensions.advance(id, ExtensionState::DependenciesWalked);
    Ok(Some(name))
}

fn resolve_exactly_one(
    resolver: &dyn DependencyResolver,
    extension: &str,
    notation: &DependencyNotation,
) -> Result<ResolvedArtifact> {
    let mut matches = resolver.resolve_artifact(notation)?;
    if matches.len() != 1 {
        return Err(ConfigError::ArtifactCount {
            extension: extension.to_string(),
            notation: notation.to_string(),
            found: matches.len(),
        }
        .into());
    }
    Ok(matches.remove(0))
}

fn resolve_declared(
    resolver: &dyn DependencyResolver,
    notation: &DependencyNotation,
) -> Result<Vec<ResolvedArtifact>> {
    let matches = resolver.resolve_artifact(notation)?;
    if matches.is_empty() {
        return Err(ConfigError::UnknownArtifact {
            coordinate: notation.to_string(),
        }
        .into());
    }
    Ok(matches)
}

/// The marker's `deployment-artifact`, else the `-deployment` sibling. Absence
/// is not an error.
fn resolve_conventional_deployment(
    resolver: &dyn DependencyResolver,
    own: &ResolvedArtifact,
    marker: Option<&ExtensionMarker>,
) -> Option<ResolvedArtifact> {
    let notation = marker
        .and_then(ExtensionMarker::deployment_artifact)
        .and_then(|raw| match raw.parse::<DependencyNotation>() {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::debug!(coordinate = %own.coordinate, error = %e, "Ignoring marker deployment-artifact");
                None
            }
        })
        .unwrap_or_else(|| own.coordinate.deployment_counterpart().to_notation());

    match resolver.resolve_artifact(&notation) {
        Ok(mut matches) if matches.len() == 1 => Some(matches.remove(0)),
        Ok(matches) => {
            tracing::debug!(
                coordinate = %own.coordinate,
                deployment = %notation,
                found = matches.len(),
                "No unique deployment artifact"
            );
            None
        }
        Err(e) => {
            tracing::debug!(coordinate = %own.coordinate, error = %e, "Deployment lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactSource, ArtifactTree, MemoryArtifactSource, MemoryTree};
    use crate::extension::ExtensionSpec;
    use crate::indexer::ArtifactIndexer;
    use crate::resolver::ManifestResolver;
    use crate::store::NoIndexStore;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn c(s: &str) -> Coordinate {
        s.parse().unwrap()
    }

    /// Counts marker lookups per artifact location.
    struct CountingSource {
        inner: MemoryArtifactSource,
        marker_checks: Arc<AtomicUsize>,
    }

    struct CountingTree {
        inner: Box<dyn ArtifactTree>,
        marker_checks: Arc<AtomicUsize>,
    }

    impl ArtifactSource for CountingSource {
        fn open(&self, location: &Path) -> Result<Box<dyn ArtifactTree>> {
            Ok(Box::new(CountingTree {
                inner: self.inner.open(location)?,
                marker_checks: Arc::clone(&self.marker_checks),
            }))
        }
    }

    impl ArtifactTree for CountingTree {
        fn has_path(&mut self, path: &str) -> bool {
            if path == MARKER_PATH {
                self.marker_checks.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.has_path(path)
        }

        fn read(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
            self.inner.read(path)
        }

        fn class_entries(&mut self) -> Result<Vec<String>> {
            self.inner.class_entries()
        }
    }

    struct Fixture {
        source: MemoryArtifactSource,
        resolver: ManifestResolver,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                source: MemoryArtifactSource::new(),
                resolver: ManifestResolver::new(),
            }
        }

        fn artifact(&mut self, gav: &str, marker: Option<&str>, deps: &[&str]) -> &mut Self {
            let location = format!("mem:{gav}");
            let mut tree = MemoryTree::new();
            if let Some(props) = marker {
                tree = tree.with_entry(MARKER_PATH, props);
            }
            self.source.insert(location.clone(), tree);
            self.resolver.add(
                ResolvedArtifact::new(c(gav), location),
                deps.iter().map(|d| c(d)).collect(),
            );
            self
        }

        fn pom(&mut self, gav: &str) -> &mut Self {
            let location = format!("mem:{gav}");
            self.source
                .insert(location.clone(), MemoryTree::new().with_entry(MARKER_PATH, ""));
            self.resolver.add(
                ResolvedArtifact::new(c(gav), location).with_classifier("pom"),
                Vec::new(),
            );
            self
        }

        fn context(&self) -> (BuildContext, Arc<AtomicUsize>) {
            let checks = Arc::new(AtomicUsize::new(0));
            let source = CountingSource {
                inner: self.source.clone(),
                marker_checks: Arc::clone(&checks),
            };
            let indexer = ArtifactIndexer::new(Arc::new(source), Arc::new(NoIndexStore));
            (BuildContext::new(indexer), checks)
        }
    }

    fn declared(name: &str, notation: &str) -> ExtensionRequest {
        ExtensionSpec::artifact(name, notation.parse().unwrap())
            .into_request(None)
            .unwrap()
    }

    #[test]
    fn transitive_marker_yields_implicit_extension() -> Result<()> {
        let mut fx = Fixture::new();
        fx.artifact("g:x:1", Some(""), &["g:y:1"])
            .artifact("g:y:1", Some(""), &["g:plain:1"])
            .artifact("g:plain:1", None, &[]);
        let (mut ctx, _) = fx.context();

        let report = discover(&mut ctx, &fx.resolver, [declared("X", "g:x:1")])?;

        assert_eq!(report.registered, vec!["X", "y"]);
        assert_eq!(ctx.extensions.len(), 2);
        let x = ctx.extensions.by_coordinate(&c("g:x:1")).unwrap();
        assert_eq!((x.name(), x.kind()), ("X", ExtensionKind::Declared));
        let y = ctx.extensions.by_coordinate(&c("g:y:1")).unwrap();
        assert_eq!((y.name(), y.kind()), ("y", ExtensionKind::Implicit));
        assert!(ctx
            .extensions
            .iter()
            .all(|e| e.state() == ExtensionState::DependenciesWalked));

        let runtime: Vec<_> = ctx.runtime.iter().map(Coordinate::gav).collect();
        assert_eq!(runtime, vec!["g:x:1", "g:y:1", "g:plain:1"]);
        Ok(())
    }

    #[test]
    fn each_coordinate_is_probed_once_even_on_cycles() -> Result<()> {
        let mut fx = Fixture::new();
        fx.artifact("g:a:1", Some(""), &["g:b:1", "g:c:1"])
            .artifact("g:b:1", Some(""), &["g:a:1", "g:c:1"])
            .artifact("g:c:1", None, &["g:b:1"])
            .pom("g:bom:1");
        fx.resolver.add(
            ResolvedArtifact::new(c("g:d:1"), "mem:g:d:1"),
            vec![c("g:bom:1"), c("g:a:1")],
        );
        fx.source.insert("mem:g:d:1", MemoryTree::new().with_entry(MARKER_PATH, ""));
        let (mut ctx, checks) = fx.context();

        let report = discover(
            &mut ctx,
            &fx.resolver,
            [declared("A", "g:a:1"), declared("D", "g:d:1")],
        )?;

        // a, b, c and d; the pom is never opened for its marker
        assert_eq!(report.probes, 4);
        assert_eq!(checks.load(Ordering::SeqCst), 4);
        assert_eq!(report.registered, vec!["A", "D", "b"]);
        assert!(!ctx.extensions.contains_coordinate(&c("g:bom:1")));
        Ok(())
    }

    #[test]
    fn declared_artifact_must_resolve_to_exactly_one() {
        let mut fx = Fixture::new();
        fx.artifact("g:x:1", Some(""), &[]).artifact("g:x:2", Some(""), &[]);
        let (mut ctx, _) = fx.context();

        let err = discover(&mut ctx, &fx.resolver, [declared("X", "g:x")]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ArtifactCount {
                extension: "X".into(),
                notation: "g:x".into(),
                found: 2
            })
        );

        let err = discover(&mut ctx, &fx.resolver, [declared("Z", "g:z:1")]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ArtifactCount { found: 0, .. })
        ));
    }

    #[test]
    fn missing_marker_on_own_artifact_is_not_fatal() -> Result<()> {
        let mut fx = Fixture::new();
        fx.artifact("g:x:1", None, &[]);
        let (mut ctx, _) = fx.context();
        discover(&mut ctx, &fx.resolver, [declared("X", "g:x:1")])?;
        assert!(ctx.extensions.by_name("X").is_some());
        Ok(())
    }

    #[test]
    fn unopenable_dependency_counts_as_no_marker() -> Result<()> {
        let mut fx = Fixture::new();
        fx.artifact("g:x:1", Some(""), &["g:ghost:1"]);
        fx.resolver
            .add(ResolvedArtifact::new(c("g:ghost:1"), "mem:nowhere"), Vec::new());
        let (mut ctx, _) = fx.context();

        discover(&mut ctx, &fx.resolver, [declared("X", "g:x:1")])?;
        assert_eq!(ctx.extensions.len(), 1);
        let ghost = ctx.dependencies.get(&c("g:ghost:1")).unwrap();
        assert!(ghost.indexed().is_some_and(|i| i.is_empty()));
        Ok(())
    }

    #[test]
    fn deployment_follows_convention_or_marker() -> Result<()> {
        let mut fx = Fixture::new();
        fx.artifact("g:conv:1", Some(""), &[])
            .artifact("g:conv-deployment:1", None, &["g:deploy-only:1"])
            .artifact("g:deploy-only:1", Some(""), &[])
            .artifact("g:named:1", Some("deployment-artifact=g:elsewhere:9"), &[])
            .artifact("g:elsewhere:9", None, &[])
            .artifact("g:lonely:1", Some(""), &[]);
        let (mut ctx, _) = fx.context();

        discover(
            &mut ctx,
            &fx.resolver,
            [
                declared("conv", "g:conv:1"),
                declared("named", "g:named:1"),
                declared("lonely", "g:lonely:1"),
            ],
        )?;

        let deployment_of = |name: &str| {
            ctx.extensions
                .by_name(name)
                .and_then(|e| e.deployment())
                .map(Coordinate::gav)
        };
        assert_eq!(deployment_of("conv"), Some("g:conv-deployment:1".into()));
        assert_eq!(deployment_of("named"), Some("g:elsewhere:9".into()));
        assert_eq!(deployment_of("lonely"), None);

        // deployment closure is registered but neither probed nor part of the runtime set
        assert!(ctx.dependencies.contains(&c("g:deploy-only:1")));
        assert!(!ctx.runtime.contains(&c("g:deploy-only:1")));
        assert!(!ctx.extensions.contains_coordinate(&c("g:deploy-only:1")));
        assert_eq!(
            ctx.extensions.by_gav("g:conv-deployment:1").map(|e| e.name()),
            Some("conv")
        );
        Ok(())
    }

    #[test]
    fn explicit_deployment_is_strict() {
        let mut fx = Fixture::new();
        fx.artifact("g:x:1", Some(""), &[]);
        let (mut ctx, _) = fx.context();

        let mut request = declared("X", "g:x:1");
        request.deployment = Some("g:x-missing:1".parse().unwrap());
        let err = discover(&mut ctx, &fx.resolver, [request]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ArtifactCount { found: 0, .. })
        ));
    }

    #[test]
    fn declaring_the_same_artifact_twice_is_rejected() {
        let mut fx = Fixture::new();
        fx.artifact("g:x:1", Some(""), &[]);
        let (mut ctx, _) = fx.context();

        let err = discover(
            &mut ctx,
            &fx.resolver,
            [declared("one", "g:x:1"), declared("two", "g:x:1")],
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::DuplicateExtension {
                key: "g:x:1".into()
            })
        );
    }

    #[test]
    fn later_declaration_wins_over_queued_implicit() -> Result<()> {
        let mut fx = Fixture::new();
        fx.artifact("g:x:1", Some(""), &["g:y:1"])
            .artifact("g:y:1", Some(""), &[]);
        let (mut ctx, _) = fx.context();

        let report = discover(
            &mut ctx,
            &fx.resolver,
            [declared("X", "g:x:1"), declared("Y", "g:y:1")],
        )?;
        assert_eq!(report.registered, vec!["X", "Y"]);
        assert_eq!(
            ctx.extensions.by_coordinate(&c("g:y:1")).map(|e| e.kind()),
            Some(ExtensionKind::Declared)
        );
        Ok(())
    }
}
