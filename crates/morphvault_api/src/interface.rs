//! # Plugin Interface
//!
//! The versioned surface external plugins program against, and the host
//! façade that grants it. Version negotiation happens once, at request time;
//! a granted interface never changes its behavior under its consumer.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use morphvault_core::{Category, EntityId, EntityStateRegistry, PresetIdentityTable, PresetRecord};

use crate::dispatcher::EventDispatcher;
use crate::events::{
    ActorChangeListener, ChangeChannel, ChangeEvent, ChangeFlags, ReadinessListener,
};

/// Published interface versions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiVersion {
    /// The initial published surface.
    V1,
}

impl ApiVersion {
    /// The newest version this build can grant.
    pub const LATEST: Self = Self::V1;

    /// Maps a raw requested version to a published one.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::V1),
            _ => None,
        }
    }

    /// The raw wire value of this version.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::V1 => 1,
        }
    }
}

/// Errors surfaced to external plugins.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    /// The requested interface version is not published by this build.
    #[error("interface version {0} is not supported")]
    UnsupportedVersion(u32),
}

/// Applies or clears the visual side of a preset. Host glue implements it;
/// the core never does morph math itself.
pub trait BodyApplier: Send + Sync {
    /// Applies `preset`'s morphs to `entity`.
    fn apply_preset(&self, entity: EntityId, preset: &PresetRecord, immediate: bool);

    /// Removes all managed morphs from `entity`.
    fn clear_morphs(&self, entity: EntityId, immediate: bool);
}

/// Options for [`PluginInterface::assign_preset`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AssignOptions {
    /// Record the assignment without touching the entity's morphs.
    pub skip_morphs: bool,
    /// Ask the applier to take effect immediately instead of batched.
    pub immediate: bool,
}

/// An external plugin's request for an interface grant.
pub struct InterfaceRequest {
    /// Raw requested interface version.
    pub version: u32,
    /// Optional readiness subscription to establish with the grant.
    pub readiness_listener: Option<Arc<dyn ReadinessListener>>,
}

/// The dependency-injected service façade the host glue assembles.
pub struct PluginHost {
    identity: Arc<PresetIdentityTable>,
    registry: Arc<EntityStateRegistry>,
    dispatcher: Arc<EventDispatcher>,
    applier: Arc<dyn BodyApplier>,
}

impl PluginHost {
    /// Assembles a host over the shared core services.
    #[must_use]
    pub fn new(
        identity: Arc<PresetIdentityTable>,
        registry: Arc<EntityStateRegistry>,
        dispatcher: Arc<EventDispatcher>,
        applier: Arc<dyn BodyApplier>,
    ) -> Self {
        Self {
            identity,
            registry,
            dispatcher,
            applier,
        }
    }

    /// The dispatcher lifecycle signals and listeners route through.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Grants an interface to an external plugin.
    ///
    /// An unknown version is declined with [`ApiError::UnsupportedVersion`]
    /// and a warning; the caller is never crashed. A readiness listener
    /// supplied with the request is registered before this returns, so the
    /// already-ready replay applies.
    pub fn request_interface(
        self: &Arc<Self>,
        request: InterfaceRequest,
        owner: &str,
    ) -> Result<Arc<PluginInterface>, ApiError> {
        let Some(version) = ApiVersion::from_raw(request.version) else {
            warn!(
                owner,
                requested = request.version,
                "declined interface request for unsupported version"
            );
            return Err(ApiError::UnsupportedVersion(request.version));
        };

        if let Some(listener) = request.readiness_listener {
            self.dispatcher.register_readiness_listener(listener);
        }

        info!(owner, version = version.raw(), "granted plugin interface");
        Ok(Arc::new(PluginInterface {
            version,
            owner: RwLock::new(Arc::from(owner)),
            host: Arc::clone(self),
        }))
    }

    /// Notification entry point for collaborators that change an entity.
    ///
    /// Routes through the dispatcher's guard/snapshot protocol; the payload
    /// is only materialized if a fan-out actually happens.
    pub fn announce_change(
        &self,
        entity: EntityId,
        channel: ChangeChannel,
        flags: ChangeFlags,
        preset_name: Option<Arc<str>>,
        source: Option<Arc<str>>,
    ) {
        self.dispatcher.send_actor_change(entity, || ChangeEvent {
            channel,
            flags,
            preset_name,
            source,
        });
    }
}

/// A granted, versioned view of the host. Cheap to clone via `Arc`.
pub struct PluginInterface {
    version: ApiVersion,
    owner: RwLock<Arc<str>>,
    host: Arc<PluginHost>,
}

impl PluginInterface {
    /// The version this interface was granted at.
    #[must_use]
    pub fn api_version(&self) -> ApiVersion {
        self.version
    }

    /// The name of the plugin holding this interface.
    #[must_use]
    pub fn owner(&self) -> Arc<str> {
        self.owner.read().clone()
    }

    /// Renames the holder; shows up as the source of subsequent events.
    pub fn set_owner(&self, owner: &str) {
        *self.owner.write() = Arc::from(owner);
    }

    /// The preset currently assigned to `entity`, if any.
    ///
    /// `None` covers both "no assignment" and "assigned preset not in the
    /// loaded set"; neither is an error.
    #[must_use]
    pub fn assigned_preset(&self, entity: EntityId, category: Category) -> Option<Arc<str>> {
        let slot = self.host.registry.assigned_slot(entity);
        if slot == 0 {
            return None;
        }
        self.host.identity.resolve_name(slot - 1, category)
    }

    /// Assigns `name`'s preset to `entity`, or clears the assignment.
    ///
    /// `None` or an empty name clears: the slot is zeroed, morphs are
    /// cleared unless `skip_morphs`, and if there *was* an assignment a
    /// [`ChangeChannel::PresetChangedWithoutGeneration`] event flagged
    /// [`ChangeFlags::PRESET_WAS_UNASSIGNED`] reports the previous preset.
    ///
    /// A named preset is looked up case-insensitively in the loaded set;
    /// an unknown name returns `false` and changes nothing. On success the
    /// preset's stable index is recorded for the entity, morphs are applied
    /// unless `skip_morphs`, and a change event fans out naming this
    /// interface's owner as the source.
    pub fn assign_preset(
        &self,
        entity: EntityId,
        category: Category,
        name: Option<&str>,
        options: AssignOptions,
    ) -> bool {
        match name {
            None | Some("") => {
                self.clear_assignment(entity, category, options);
                true
            }
            Some(name) => self.assign_named(entity, category, name, options),
        }
    }

    fn clear_assignment(&self, entity: EntityId, category: Category, options: AssignOptions) {
        let previous = self.host.registry.assigned_slot(entity);
        self.host.registry.set_assigned_slot(entity, 0);
        if !options.skip_morphs {
            self.host.applier.clear_morphs(entity, options.immediate);
        }
        if previous != 0 {
            let previous_name = self.host.identity.resolve_name(previous - 1, category);
            self.host.announce_change(
                entity,
                ChangeChannel::PresetChangedWithoutGeneration,
                ChangeFlags::PRESET_WAS_UNASSIGNED,
                previous_name,
                Some(self.owner()),
            );
        }
    }

    fn assign_named(
        &self,
        entity: EntityId,
        category: Category,
        name: &str,
        options: AssignOptions,
    ) -> bool {
        let Some(preset) = self.host.identity.find_loaded(name, category) else {
            debug!(entity, name, "assignment refused, preset not loaded");
            return false;
        };

        let index = self.host.identity.assign_index(&preset.name, category);
        self.host.registry.set_assigned_slot(entity, index + 1);
        if !options.skip_morphs {
            self.host
                .applier
                .apply_preset(entity, &preset, options.immediate);
        }
        self.host.announce_change(
            entity,
            ChangeChannel::PresetChangedWithoutGeneration,
            ChangeFlags::NONE,
            Some(preset.name),
            Some(self.owner()),
        );
        true
    }

    /// Number of presets loaded for `category`.
    #[must_use]
    pub fn preset_count(&self, category: Category) -> usize {
        self.host.identity.preset_count(category)
    }

    /// Up to `limit` loaded preset names for `category`, starting at `offset`.
    #[must_use]
    pub fn preset_names(&self, category: Category, offset: usize, limit: usize) -> Vec<Arc<str>> {
        self.host.identity.names(category, offset, limit)
    }

    /// Subscribes a change listener through this interface.
    pub fn register_change_listener(&self, listener: Arc<dyn ActorChangeListener>) {
        self.host.dispatcher.register_change_listener(listener);
    }

    /// Unsubscribes a change listener. Returns whether it was subscribed.
    pub fn deregister_change_listener(&self, listener: &Arc<dyn ActorChangeListener>) -> bool {
        self.host.dispatcher.deregister_change_listener(listener)
    }

    /// Subscribes a readiness listener through this interface.
    pub fn register_readiness_listener(&self, listener: Arc<dyn ReadinessListener>) {
        self.host.dispatcher.register_readiness_listener(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingApplier {
        applied: Mutex<Vec<(EntityId, String, bool)>>,
        cleared: Mutex<Vec<(EntityId, bool)>>,
    }

    impl BodyApplier for RecordingApplier {
        fn apply_preset(&self, entity: EntityId, preset: &PresetRecord, immediate: bool) {
            self.applied
                .lock()
                .push((entity, preset.name.to_string(), immediate));
        }

        fn clear_morphs(&self, entity: EntityId, immediate: bool) {
            self.cleared.lock().push((entity, immediate));
        }
    }

    #[derive(Default)]
    struct EventRecorder {
        received: Mutex<Vec<(EntityId, ChangeEvent)>>,
    }

    impl ActorChangeListener for EventRecorder {
        fn on_actor_change(&self, entity: EntityId, event: &ChangeEvent) {
            self.received.lock().push((entity, event.clone()));
        }
    }

    struct Fixture {
        host: Arc<PluginHost>,
        identity: Arc<PresetIdentityTable>,
        registry: Arc<EntityStateRegistry>,
        applier: Arc<RecordingApplier>,
    }

    fn fixture() -> Fixture {
        let identity = Arc::new(PresetIdentityTable::new());
        identity.install_presets(
            Category::Female,
            vec![PresetRecord::new("Curvy"), PresetRecord::new("Slim")],
        );
        let registry = Arc::new(EntityStateRegistry::new());
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&registry)));
        let applier = Arc::new(RecordingApplier::default());
        let host = Arc::new(PluginHost::new(
            Arc::clone(&identity),
            Arc::clone(&registry),
            dispatcher,
            applier.clone(),
        ));
        Fixture {
            host,
            identity,
            registry,
            applier,
        }
    }

    fn grant(fixture: &Fixture) -> Arc<PluginInterface> {
        fixture
            .host
            .request_interface(
                InterfaceRequest {
                    version: ApiVersion::LATEST.raw(),
                    readiness_listener: None,
                },
                "TestPlugin",
            )
            .unwrap()
    }

    #[test]
    fn test_unsupported_version_is_declined() {
        let fixture = fixture();
        let result = fixture.host.request_interface(
            InterfaceRequest {
                version: 99,
                readiness_listener: None,
            },
            "FuturePlugin",
        );
        assert_eq!(result.err(), Some(ApiError::UnsupportedVersion(99)));
    }

    #[test]
    fn test_version_negotiation() {
        assert_eq!(ApiVersion::from_raw(1), Some(ApiVersion::V1));
        assert_eq!(ApiVersion::from_raw(0), None);
        assert_eq!(ApiVersion::LATEST.raw(), 1);
        let fixture = fixture();
        assert_eq!(grant(&fixture).api_version(), ApiVersion::V1);
    }

    #[test]
    fn test_assignment_is_case_insensitive_and_resolves() {
        let fixture = fixture();
        let interface = grant(&fixture);

        assert!(interface.assign_preset(
            0x14,
            Category::Female,
            Some("cUrVy"),
            AssignOptions::default()
        ));
        assert_eq!(
            interface.assigned_preset(0x14, Category::Female).as_deref(),
            Some("Curvy")
        );
        assert_eq!(fixture.applier.applied.lock().len(), 1);
    }

    #[test]
    fn test_unknown_preset_refused_without_side_effects() {
        let fixture = fixture();
        let interface = grant(&fixture);

        assert!(!interface.assign_preset(
            0x14,
            Category::Female,
            Some("Nonexistent"),
            AssignOptions::default()
        ));
        assert_eq!(fixture.registry.assigned_slot(0x14), 0);
        assert!(fixture.applier.applied.lock().is_empty());
    }

    #[test]
    fn test_skip_morphs_leaves_applier_untouched() {
        let fixture = fixture();
        let interface = grant(&fixture);

        let options = AssignOptions {
            skip_morphs: true,
            immediate: false,
        };
        assert!(interface.assign_preset(0x14, Category::Female, Some("Slim"), options));
        assert!(fixture.applier.applied.lock().is_empty());
        assert_eq!(
            interface.assigned_preset(0x14, Category::Female).as_deref(),
            Some("Slim")
        );
    }

    #[test]
    fn test_clearing_reports_the_previous_preset() {
        let fixture = fixture();
        let interface = grant(&fixture);
        let recorder = Arc::new(EventRecorder::default());
        interface.register_change_listener(recorder.clone());

        assert!(interface.assign_preset(
            0x14,
            Category::Female,
            Some("Curvy"),
            AssignOptions::default()
        ));
        assert!(interface.assign_preset(0x14, Category::Female, None, AssignOptions::default()));

        let received = recorder.received.lock();
        assert_eq!(received.len(), 2);
        let unassignment = &received[1].1;
        assert!(unassignment.flags.contains(ChangeFlags::PRESET_WAS_UNASSIGNED));
        assert_eq!(unassignment.preset_name.as_deref(), Some("Curvy"));
        assert_eq!(unassignment.source.as_deref(), Some("TestPlugin"));
        assert!(interface.assigned_preset(0x14, Category::Female).is_none());
        assert_eq!(fixture.applier.cleared.lock().len(), 1);
    }

    #[test]
    fn test_clearing_an_unassigned_entity_emits_nothing() {
        let fixture = fixture();
        let interface = grant(&fixture);
        let recorder = Arc::new(EventRecorder::default());
        interface.register_change_listener(recorder.clone());

        assert!(interface.assign_preset(0x14, Category::Female, None, AssignOptions::default()));
        assert!(recorder.received.lock().is_empty());
    }

    #[test]
    fn test_reassignment_reuses_the_stable_index() {
        let fixture = fixture();
        let interface = grant(&fixture);

        assert!(interface.assign_preset(
            0x14,
            Category::Female,
            Some("Curvy"),
            AssignOptions::default()
        ));
        let slot = fixture.registry.assigned_slot(0x14);
        assert!(interface.assign_preset(0x14, Category::Female, None, AssignOptions::default()));
        assert!(interface.assign_preset(
            0x14,
            Category::Female,
            Some("Curvy"),
            AssignOptions::default()
        ));
        assert_eq!(fixture.registry.assigned_slot(0x14), slot);
        assert_eq!(
            fixture.identity.lookup_index("Curvy", Category::Female),
            Some(slot - 1)
        );
    }

    #[test]
    fn test_owner_rename_shows_in_event_source() {
        let fixture = fixture();
        let interface = grant(&fixture);
        interface.set_owner("RenamedPlugin");
        assert_eq!(&*interface.owner(), "RenamedPlugin");

        let recorder = Arc::new(EventRecorder::default());
        interface.register_change_listener(recorder.clone());
        assert!(interface.assign_preset(
            0x14,
            Category::Female,
            Some("Slim"),
            AssignOptions::default()
        ));
        assert_eq!(
            recorder.received.lock()[0].1.source.as_deref(),
            Some("RenamedPlugin")
        );
    }

    #[test]
    fn test_preset_enumeration_passthrough() {
        let fixture = fixture();
        let interface = grant(&fixture);
        assert_eq!(interface.preset_count(Category::Female), 2);
        let names = interface.preset_names(Category::Female, 0, 10);
        assert_eq!(names.len(), 2);
        assert_eq!(interface.preset_count(Category::Male), 0);
    }
}
