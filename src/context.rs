//! The abstraction context: the feature manager plus the scheme universe
//! it was built over, bundled so samplers, generalizers and the discovery
//! loop can all share one instance by reference rather than copy it
//! (§9 "Index construction").

use crate::feature::{FeatureDecl, FeatureManager};
use crate::iwho::SchemeUniverse;
use std::sync::Arc;

pub struct AbstractionContext {
    pub feature_manager: FeatureManager,
    pub universe: Arc<dyn SchemeUniverse + Send + Sync>,
}

impl AbstractionContext {
    pub fn new(decls: Vec<FeatureDecl>, universe: Arc<dyn SchemeUniverse + Send + Sync>) -> Self {
        let feature_manager = FeatureManager::new(decls, universe.schemes());
        AbstractionContext { feature_manager, universe }
    }

    pub fn num_schemes(&self) -> usize {
        self.universe.schemes().len()
    }
}
