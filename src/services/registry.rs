use crate::error::{AppResult, Capability, PortabilityError};
use crate::extensions::{
    ExtensionContext, Exporter, Importer, OnlineAuthDataGenerator, TransferExtension,
};
use crate::models::job::DataType;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Installed transfer extensions, indexed by service id.
///
/// A registry only exists once every extension has been initialized, so nothing
/// can resolve against a half-started set. After that it is read-only and safe
/// to share across requests without locking.
pub struct ExtensionRegistry {
    by_service: BTreeMap<String, Vec<Arc<dyn TransferExtension>>>,
}

impl ExtensionRegistry {
    /// Initializes every extension once, in order. The first failure aborts startup.
    pub async fn initialize_all(
        extensions: Vec<Arc<dyn TransferExtension>>,
        context: &ExtensionContext,
    ) -> AppResult<Self> {
        for extension in &extensions {
            let service_id = extension.service_id();
            extension.initialize(context).await.map_err(|e| {
                error!(
                    service_id = %service_id,
                    error = %e,
                    "Transfer extension failed to initialize"
                );
                PortabilityError::ExtensionInitFailed {
                    service_id: service_id.to_string(),
                    reason: e.to_string(),
                }
            })?;
            debug!(service_id = %service_id, "Transfer extension initialized");
        }

        let mut by_service: BTreeMap<String, Vec<Arc<dyn TransferExtension>>> = BTreeMap::new();
        for extension in extensions {
            by_service
                .entry(extension.service_id().to_string())
                .or_default()
                .push(extension);
        }

        for (service_id, candidates) in &by_service {
            if candidates.len() > 1 {
                error!(
                    service_id = %service_id,
                    count = candidates.len(),
                    "Multiple transfer extensions share a service id; lookups for it will fail"
                );
            }
        }

        info!(
            services = by_service.len(),
            "Transfer extension registry initialized"
        );
        Ok(Self { by_service })
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.by_service.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_service.is_empty()
    }

    pub fn resolve(&self, service_id: &str) -> AppResult<Arc<dyn TransferExtension>> {
        self.lookup(service_id)
            .inspect_err(|e| log_lookup_failure(service_id, None, e))
    }

    pub fn get_auth_generator(
        &self,
        service_id: &str,
        data_type: DataType,
    ) -> AppResult<Arc<dyn OnlineAuthDataGenerator>> {
        self.resolve_for(service_id, data_type)?
            .auth_generator(data_type)
            .ok_or_else(|| unsupported(service_id, data_type, Capability::AuthGenerator))
    }

    pub fn get_exporter(
        &self,
        service_id: &str,
        data_type: DataType,
    ) -> AppResult<Arc<dyn Exporter>> {
        self.resolve_for(service_id, data_type)?
            .exporter(data_type)
            .ok_or_else(|| unsupported(service_id, data_type, Capability::Export))
    }

    pub fn get_importer(
        &self,
        service_id: &str,
        data_type: DataType,
    ) -> AppResult<Arc<dyn Importer>> {
        self.resolve_for(service_id, data_type)?
            .importer(data_type)
            .ok_or_else(|| unsupported(service_id, data_type, Capability::Import))
    }

    /// Unambiguous services offering `capability` for `data_type`, sorted by id.
    pub fn services_supporting(&self, capability: Capability, data_type: DataType) -> Vec<String> {
        self.by_service
            .iter()
            .filter_map(|(service_id, candidates)| match candidates.as_slice() {
                [extension] => {
                    let supported = match capability {
                        Capability::Export => extension.exporter(data_type).is_some(),
                        Capability::Import => extension.importer(data_type).is_some(),
                        Capability::AuthGenerator => extension.auth_generator(data_type).is_some(),
                    };
                    supported.then(|| service_id.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn resolve_for(
        &self,
        service_id: &str,
        data_type: DataType,
    ) -> AppResult<Arc<dyn TransferExtension>> {
        self.lookup(service_id)
            .inspect_err(|e| log_lookup_failure(service_id, Some(data_type), e))
    }

    fn lookup(&self, service_id: &str) -> AppResult<Arc<dyn TransferExtension>> {
        let candidates = self
            .by_service
            .get(service_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        find_unique(candidates, service_id).cloned()
    }
}

/// Picks the single extension whose id equals `service_id`.
pub fn find_unique<'a>(
    extensions: &'a [Arc<dyn TransferExtension>],
    service_id: &str,
) -> AppResult<&'a Arc<dyn TransferExtension>> {
    let mut matches = extensions
        .iter()
        .filter(|extension| extension.service_id() == service_id);

    match (matches.next(), matches.next()) {
        (Some(extension), None) => Ok(extension),
        (None, _) => Err(PortabilityError::ServiceNotFound(service_id.to_string())),
        (Some(_), Some(_)) => Err(PortabilityError::AmbiguousService(service_id.to_string())),
    }
}

fn log_lookup_failure(service_id: &str, data_type: Option<DataType>, failure: &PortabilityError) {
    let data_type = data_type.map(|d| d.as_str());
    match failure {
        PortabilityError::AmbiguousService(_) => error!(
            service_id = %service_id,
            data_type,
            "Ambiguous transfer extension lookup"
        ),
        _ => error!(
            service_id = %service_id,
            data_type,
            error = %failure,
            "No transfer extension for service"
        ),
    }
}

fn unsupported(service_id: &str, data_type: DataType, capability: Capability) -> PortabilityError {
    warn!(
        service_id = %service_id,
        data_type = %data_type,
        capability = %capability,
        "Transfer extension does not offer capability"
    );
    PortabilityError::CapabilityNotSupported {
        service_id: service_id.to_string(),
        data_type,
        capability,
    }
}
