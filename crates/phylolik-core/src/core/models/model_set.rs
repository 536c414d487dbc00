use super::frequencies::FrequenciesSet;
use super::ids::ModelId;
use super::{ModelError, SubstitutionModel};
use crate::core::alphabet::Alphabet;
use crate::core::parameters::{Parameter, ParameterError, ParameterList};
use crate::core::tree::{NodeId, Tree};
use slotmap::SlotMap;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelSetError {
    #[error("Model alphabet {found} does not match the set alphabet {expected}")]
    AlphabetMismatch { expected: Alphabet, found: Alphabet },

    #[error("Model has {found} states, the set expects {expected}")]
    StateCountMismatch { expected: usize, found: usize },

    #[error("No model with id {id:?} in the set")]
    ModelNotFound { id: ModelId },

    #[error("Node {node} is not associated with any model")]
    NodeWithoutModel { node: NodeId },

    #[error("Model '{model}' has no parameter named '{name}'")]
    UnknownModelParameter { model: String, name: String },

    #[error("Parameter '{name}' is not part of the set")]
    ParameterNotFound { name: String },

    #[error("Model '{name}' would have none of its parameters linked to the set")]
    OrphanModel { name: String },

    #[error("Parameter '{name}' would not be linked to any model")]
    OrphanParameter { name: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// Relationship between a global parameter and the models that share it.
#[derive(Debug, Clone, PartialEq)]
struct ParameterLink {
    /// Name of the parameter inside each linked model.
    local_name: String,
    models: Vec<ModelId>,
}

/// Assignment of substitution models to the branches of a tree.
///
/// Every non-root node is served by exactly one model; a model may serve any
/// number of nodes. Model parameters registered with the set become entries
/// of a global, uniquely named [`ParameterList`]; a global parameter may be
/// shared by several models, in which case updating it updates all of them.
/// The first registration of a local name keeps it (`kappa`), later ones get
/// an ordinal suffix (`kappa_2`, `kappa_3`, ...).
///
/// The root state distribution is either an owned [`FrequenciesSet`], whose
/// parameters are part of the global list, or, for a stationary set, the
/// equilibrium frequencies of the first model.
///
/// Structural mutations are atomic: they are applied to a copy, the copy is
/// checked for orphan models and parameters, and only a consistent copy
/// replaces the set.
#[derive(Debug, Clone)]
pub struct SubstitutionModelSet {
    alphabet: Alphabet,
    models: SlotMap<ModelId, Box<dyn SubstitutionModel>>,
    /// Insertion order of the models.
    order: Vec<ModelId>,
    node_to_model: BTreeMap<NodeId, ModelId>,
    root_frequencies: Option<Box<dyn FrequenciesSet>>,
    /// Root-frequency parameters first, then model parameters.
    parameters: ParameterList,
    links: BTreeMap<String, ParameterLink>,
}

impl SubstitutionModelSet {
    /// Creates an empty set whose root distribution is `root_frequencies`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelSetError::AlphabetMismatch`] if the frequencies set is
    /// defined over another alphabet.
    pub fn new(alphabet: Alphabet, root_frequencies: Box<dyn FrequenciesSet>) -> Result<Self, ModelSetError> {
        if root_frequencies.alphabet() != alphabet {
            return Err(ModelSetError::AlphabetMismatch {
                expected: alphabet,
                found: root_frequencies.alphabet(),
            });
        }
        let parameters = root_frequencies.parameters().clone();
        Ok(Self {
            alphabet,
            models: SlotMap::with_key(),
            order: Vec::new(),
            node_to_model: BTreeMap::new(),
            root_frequencies: Some(root_frequencies),
            parameters,
            links: BTreeMap::new(),
        })
    }

    /// Creates an empty set whose root distribution is the equilibrium of
    /// its first model.
    pub fn new_stationary(alphabet: Alphabet) -> Self {
        Self {
            alphabet,
            models: SlotMap::with_key(),
            order: Vec::new(),
            node_to_model: BTreeMap::new(),
            root_frequencies: None,
            parameters: ParameterList::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    pub fn is_stationary(&self) -> bool {
        self.root_frequencies.is_none()
    }

    /// Number of states of the models in the set.
    pub fn number_of_states(&self) -> usize {
        match (&self.root_frequencies, self.order.first()) {
            (Some(root), _) => root.number_of_states(),
            (None, Some(id)) => self.models[*id].number_of_states(),
            (None, None) => self.alphabet.size(),
        }
    }

    /// The global, de-duplicated parameter list.
    pub fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    /// Position of `name` in the global list.
    pub fn parameter_index(&self, name: &str) -> Result<usize, ModelSetError> {
        self.parameters
            .index_of(name)
            .ok_or_else(|| ModelSetError::ParameterNotFound { name: name.to_string() })
    }

    pub fn number_of_models(&self) -> usize {
        self.order.len()
    }

    /// Model ids in insertion order.
    pub fn model_ids(&self) -> &[ModelId] {
        &self.order
    }

    pub fn model(&self, id: ModelId) -> Option<&dyn SubstitutionModel> {
        self.models.get(id).map(|m| m.as_ref())
    }

    /// Parameters of the model, under their local names.
    pub fn model_parameters(&self, id: ModelId) -> Option<&ParameterList> {
        self.models.get(id).map(|m| m.parameters())
    }

    pub fn model_id_for_node(&self, node: NodeId) -> Option<ModelId> {
        self.node_to_model.get(&node).copied()
    }

    pub fn model_for_node(&self, node: NodeId) -> Option<&dyn SubstitutionModel> {
        self.model_id_for_node(node).and_then(|id| self.model(id))
    }

    /// Nodes served by the model, in increasing id order.
    pub fn nodes_with_model(&self, id: ModelId) -> Vec<NodeId> {
        self.node_to_model
            .iter()
            .filter(|(_, m)| **m == id)
            .map(|(n, _)| *n)
            .collect()
    }

    /// Nodes served by a model that depends on the global parameter `name`.
    ///
    /// Root-frequency parameters and unknown names yield no node.
    pub fn nodes_with_parameter(&self, name: &str) -> Vec<NodeId> {
        let Some(link) = self.links.get(name) else {
            return Vec::new();
        };
        self.node_to_model
            .iter()
            .filter(|(_, m)| link.models.contains(m))
            .map(|(n, _)| *n)
            .collect()
    }

    /// Models linked to the global parameter `name`.
    pub fn models_with_parameter(&self, name: &str) -> &[ModelId] {
        self.links.get(name).map(|l| l.models.as_slice()).unwrap_or(&[])
    }

    pub fn is_root_frequency_parameter(&self, name: &str) -> bool {
        self.root_frequencies
            .as_ref()
            .is_some_and(|r| r.parameters().contains(name))
    }

    /// Distribution of the ancestral state at the root.
    pub fn root_frequencies(&self) -> Vec<f64> {
        match (&self.root_frequencies, self.order.first()) {
            (Some(root), _) => root.frequencies().to_vec(),
            (None, Some(id)) => self.models[*id].frequencies().to_vec(),
            (None, None) => {
                let n = self.alphabet.size();
                vec![1.0 / n as f64; n]
            }
        }
    }

    /// Parameters of the root frequencies set; empty for a stationary set.
    pub fn root_frequencies_parameters(&self) -> ParameterList {
        self.root_frequencies
            .as_ref()
            .map(|r| r.parameters().clone())
            .unwrap_or_default()
    }

    /// Human-readable description of every model with the nodes it serves.
    pub fn list_model_names(&self) -> Vec<String> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let nodes = self
                    .nodes_with_model(*id)
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Model {}: {} (nodes: {})", i + 1, self.models[*id].name(), nodes)
            })
            .collect()
    }

    /// Checks that the set can compute a likelihood on `tree`.
    ///
    /// Every non-root node must be bound to a model, every model must serve
    /// at least one node of the tree, and every model parameter of the
    /// global list must be linked to a model.
    pub fn is_fully_set_up_for(&self, tree: &Tree) -> bool {
        let branches = tree.branch_nodes();
        let nodes_bound = branches.iter().all(|n| self.node_to_model.contains_key(n));
        let models_used = self
            .order
            .iter()
            .all(|id| branches.iter().any(|n| self.node_to_model.get(n) == Some(id)));
        nodes_bound && models_used && self.check_orphan_parameters().is_ok()
    }

    /// Adds a model and binds it to `nodes`.
    ///
    /// Previous bindings of the listed nodes are replaced. Each name of
    /// `new_parameters` must be a parameter of the model; it becomes a global
    /// parameter linked to this model only. Other parameters of the model
    /// stay private and keep their current values.
    ///
    /// # Arguments
    ///
    /// * `model` - The model; the set takes ownership of it.
    /// * `nodes` - The nodes served by the model.
    /// * `new_parameters` - Local names of the parameters to expose.
    ///
    /// # Return
    ///
    /// The id of the new model.
    ///
    /// # Errors
    ///
    /// Fails on an alphabet or state-count mismatch, or if a listed name is
    /// not a parameter of the model.
    pub fn add_model<S: AsRef<str>>(
        &mut self,
        model: Box<dyn SubstitutionModel>,
        nodes: &[NodeId],
        new_parameters: &[S],
    ) -> Result<ModelId, ModelSetError> {
        self.check_compatible(model.as_ref())?;
        let mut staged = self.clone();
        let model_name = model.name().to_string();
        let id = staged.models.insert(model);
        staged.order.push(id);
        for &node in nodes {
            staged.node_to_model.insert(node, id);
        }
        for local in new_parameters {
            let local = local.as_ref();
            let parameter = staged.models[id].parameters().get(local).cloned().ok_or_else(|| {
                ModelSetError::UnknownModelParameter {
                    model: model_name.clone(),
                    name: local.to_string(),
                }
            })?;
            let global = staged.unique_name(local);
            staged.parameters.add(parameter.renamed(global.clone()))?;
            staged.links.insert(
                global,
                ParameterLink {
                    local_name: local.to_string(),
                    models: vec![id],
                },
            );
        }
        staged.check_orphan_parameters()?;
        *self = staged;
        debug!(model = %model_name, nodes = nodes.len(), "Added model to set.");
        Ok(id)
    }

    /// Replaces the model `id`, keeping its node and parameter associations.
    ///
    /// The new model receives the current values of its linked global
    /// parameters.
    pub fn set_model(&mut self, model: Box<dyn SubstitutionModel>, id: ModelId) -> Result<(), ModelSetError> {
        self.check_compatible(model.as_ref())?;
        let mut staged = self.clone();
        let slot = staged.models.get_mut(id).ok_or(ModelSetError::ModelNotFound { id })?;
        *slot = model;
        let values = staged.local_values_for(id)?;
        staged.models[id].set_parameter_values(&values)?;
        *self = staged;
        Ok(())
    }

    /// Binds `node` to the model `id`, replacing any previous binding.
    pub fn set_model_to_node(&mut self, id: ModelId, node: NodeId) -> Result<(), ModelSetError> {
        if !self.models.contains_key(id) {
            return Err(ModelSetError::ModelNotFound { id });
        }
        self.node_to_model.insert(node, id);
        Ok(())
    }

    /// Links the global parameter `name` to the model `id` as well.
    ///
    /// The model must have a parameter with the same local name; it takes
    /// the global value.
    pub fn set_parameter_to_model(&mut self, name: &str, id: ModelId) -> Result<(), ModelSetError> {
        let mut staged = self.clone();
        let link = staged
            .links
            .get_mut(name)
            .ok_or_else(|| ModelSetError::ParameterNotFound { name: name.to_string() })?;
        let model = staged.models.get(id).ok_or(ModelSetError::ModelNotFound { id })?;
        if !model.parameters().contains(&link.local_name) {
            return Err(ModelSetError::UnknownModelParameter {
                model: model.name().to_string(),
                name: link.local_name.clone(),
            });
        }
        if !link.models.contains(&id) {
            link.models.push(id);
        }
        let local = ParameterList::from_parameters([Parameter::unconstrained(
            link.local_name.clone(),
            staged.parameters.value(name)?,
        )])?;
        staged.models[id].set_parameter_values(&local)?;
        *self = staged;
        Ok(())
    }

    /// Removes the link between the global parameter `name` and model `id`.
    ///
    /// # Errors
    ///
    /// The set is left unchanged and [`ModelSetError::OrphanModel`] is
    /// returned if this was the last linked parameter of the model, or
    /// [`ModelSetError::OrphanParameter`] if the parameter would no longer be
    /// linked to any model.
    pub fn unset_parameter_to_model(&mut self, name: &str, id: ModelId) -> Result<(), ModelSetError> {
        let model = self.models.get(id).ok_or(ModelSetError::ModelNotFound { id })?;
        let mut staged = self.clone();
        let link = staged
            .links
            .get_mut(name)
            .ok_or_else(|| ModelSetError::ParameterNotFound { name: name.to_string() })?;
        link.models.retain(|m| *m != id);
        if !staged.links.values().any(|l| l.models.contains(&id)) {
            return Err(ModelSetError::OrphanModel {
                name: model.name().to_string(),
            });
        }
        staged.check_orphan_parameters()?;
        *self = staged;
        Ok(())
    }

    /// Adds a global parameter linked to the models of `nodes`.
    ///
    /// The name of `parameter` is the local name in those models; the
    /// global name is made unique. The models take the value of `parameter`.
    ///
    /// # Return
    ///
    /// The global name of the new parameter.
    pub fn add_parameter(&mut self, parameter: &Parameter, nodes: &[NodeId]) -> Result<String, ModelSetError> {
        let mut staged = self.clone();
        let global = staged.add_parameter_unchecked(parameter, nodes)?;
        staged.check_orphan_parameters()?;
        *self = staged;
        Ok(global)
    }

    /// Adds every parameter of `parameters`, see [`Self::add_parameter`].
    pub fn add_parameters(&mut self, parameters: &ParameterList, nodes: &[NodeId]) -> Result<Vec<String>, ModelSetError> {
        let mut staged = self.clone();
        let globals = parameters
            .iter()
            .map(|p| staged.add_parameter_unchecked(p, nodes))
            .collect::<Result<Vec<_>, _>>()?;
        staged.check_orphan_parameters()?;
        *self = staged;
        Ok(globals)
    }

    /// Removes a model, its node bindings and the parameters it alone used.
    ///
    /// Parameters shared with other models stay and lose only this link.
    pub fn remove_model(&mut self, id: ModelId) -> Result<Box<dyn SubstitutionModel>, ModelSetError> {
        if !self.models.contains_key(id) {
            return Err(ModelSetError::ModelNotFound { id });
        }
        let mut staged = self.clone();
        staged.order.retain(|m| *m != id);
        staged.node_to_model.retain(|_, m| *m != id);
        let mut exclusive = Vec::new();
        for (name, link) in staged.links.iter_mut() {
            link.models.retain(|m| *m != id);
            if link.models.is_empty() {
                exclusive.push(name.clone());
            }
        }
        for name in &exclusive {
            staged.links.remove(name);
        }
        staged.parameters.remove_all(&exclusive);
        staged.check_orphan_parameters()?;
        let removed = staged.models.remove(id).ok_or(ModelSetError::ModelNotFound { id })?;
        *self = staged;
        debug!(model = removed.name(), dropped = exclusive.len(), "Removed model from set.");
        Ok(removed)
    }

    /// Copies matching values into the global list and propagates them.
    ///
    /// # Return
    ///
    /// The global names whose value changed.
    pub fn set_parameter_values(&mut self, values: &ParameterList) -> Result<Vec<String>, ModelSetError> {
        let changed = self.parameters.match_values(values)?;
        self.fire_parameter_changed(&changed)?;
        Ok(changed)
    }

    /// Pushes the global values of `names` to their dependents.
    ///
    /// Root-frequency parameters update only the root frequencies; model
    /// parameters update every linked model under its local name.
    pub fn fire_parameter_changed<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), ModelSetError> {
        let mut root_values = ParameterList::new();
        let mut per_model: BTreeMap<ModelId, ParameterList> = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            let value = self.parameters.value(name)?;
            if self.is_root_frequency_parameter(name) {
                root_values.add(Parameter::unconstrained(name, value))?;
            } else if let Some(link) = self.links.get(name) {
                for id in &link.models {
                    per_model
                        .entry(*id)
                        .or_default()
                        .add(Parameter::unconstrained(link.local_name.clone(), value))?;
                }
            }
        }
        if let Some(root) = self.root_frequencies.as_mut() {
            if !root_values.is_empty() {
                root.set_parameter_values(&root_values)?;
            }
        }
        for (id, values) in per_model {
            if let Some(model) = self.models.get_mut(id) {
                let changed = model.set_parameter_values(&values)?;
                trace!(model = model.name(), changed = ?changed, "Model parameters updated.");
            }
        }
        Ok(())
    }

    fn check_compatible(&self, model: &dyn SubstitutionModel) -> Result<(), ModelSetError> {
        if model.alphabet() != self.alphabet {
            return Err(ModelSetError::AlphabetMismatch {
                expected: self.alphabet,
                found: model.alphabet(),
            });
        }
        let expected = match (&self.root_frequencies, self.order.first()) {
            (Some(root), _) => Some(root.number_of_states()),
            (None, Some(id)) => Some(self.models[*id].number_of_states()),
            (None, None) => None,
        };
        match expected {
            Some(expected) if expected != model.number_of_states() => Err(ModelSetError::StateCountMismatch {
                expected,
                found: model.number_of_states(),
            }),
            _ => Ok(()),
        }
    }

    /// `local` if free, otherwise `local_k` with `k` the ordinal of this
    /// registration of `local`, bumped until unique.
    fn unique_name(&self, local: &str) -> String {
        let registered = self.links.values().filter(|l| l.local_name == local).count();
        if registered == 0 && !self.parameters.contains(local) {
            return local.to_string();
        }
        let mut k = registered + 1;
        loop {
            let candidate = format!("{local}_{k}");
            if !self.parameters.contains(&candidate) {
                return candidate;
            }
            k += 1;
        }
    }

    fn add_parameter_unchecked(&mut self, parameter: &Parameter, nodes: &[NodeId]) -> Result<String, ModelSetError> {
        let mut ids: Vec<ModelId> = Vec::new();
        for &node in nodes {
            let id = self
                .model_id_for_node(node)
                .ok_or(ModelSetError::NodeWithoutModel { node })?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        let local = parameter.name().to_string();
        for id in &ids {
            let model = &self.models[*id];
            let Some(own) = model.parameters().get(&local) else {
                return Err(ModelSetError::UnknownModelParameter {
                    model: model.name().to_string(),
                    name: local,
                });
            };
            if !own.constraint().is_satisfied(parameter.value()) {
                return Err(ParameterError::ConstraintViolation {
                    name: local,
                    value: parameter.value(),
                    constraint: own.constraint(),
                }
                .into());
            }
        }
        let global = self.unique_name(&local);
        self.parameters.add(parameter.renamed(global.clone()))?;
        let values = ParameterList::from_parameters([parameter.clone()])?;
        for id in &ids {
            self.models[*id].set_parameter_values(&values)?;
        }
        self.links.insert(
            global.clone(),
            ParameterLink {
                local_name: local,
                models: ids,
            },
        );
        Ok(global)
    }

    /// Local values of every global parameter linked to `id`.
    fn local_values_for(&self, id: ModelId) -> Result<ParameterList, ModelSetError> {
        let mut values = ParameterList::new();
        for (global, link) in &self.links {
            if link.models.contains(&id) {
                values.add(Parameter::unconstrained(
                    link.local_name.clone(),
                    self.parameters.value(global)?,
                ))?;
            }
        }
        Ok(values)
    }

    fn check_orphan_parameters(&self) -> Result<(), ModelSetError> {
        for parameter in &self.parameters {
            if self.is_root_frequency_parameter(parameter.name()) {
                continue;
            }
            let linked = self
                .links
                .get(parameter.name())
                .is_some_and(|l| !l.models.is_empty());
            if !linked {
                return Err(ModelSetError::OrphanParameter {
                    name: parameter.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::frequencies::FullFrequenciesSet;
    use crate::core::models::nucleotide::{NucleotideModel, NucleotideModelKind};
    use crate::core::tree::parse_newick;

    fn k80() -> Box<dyn SubstitutionModel> {
        Box::new(NucleotideModel::new(NucleotideModelKind::K80, Alphabet::Dna))
    }

    fn hky() -> Box<dyn SubstitutionModel> {
        Box::new(NucleotideModel::new(NucleotideModelKind::Hky85, Alphabet::Dna))
    }

    fn quartet() -> Tree {
        parse_newick("((A:0.1,B:0.2):0.3,C:0.4,D:0.5);").unwrap()
    }

    fn two_model_set(tree: &Tree) -> (SubstitutionModelSet, ModelId, ModelId) {
        let branches = tree.branch_nodes();
        let (left, right) = branches.split_at(2);
        let root = Box::new(FullFrequenciesSet::new(Alphabet::Dna, "RootFreq"));
        let mut set = SubstitutionModelSet::new(Alphabet::Dna, root).unwrap();
        let m1 = set.add_model(k80(), left, &["kappa"]).unwrap();
        let m2 = set.add_model(k80(), right, &["kappa"]).unwrap();
        (set, m1, m2)
    }

    #[test]
    fn fully_set_up_set_resolves_every_branch() {
        let tree = quartet();
        let (set, m1, m2) = two_model_set(&tree);
        assert!(set.is_fully_set_up_for(&tree));
        for node in tree.branch_nodes() {
            let id = set.model_id_for_node(node).unwrap();
            assert!(id == m1 || id == m2);
        }
        assert!(set.model_for_node(tree.root()).is_none());
    }

    #[test]
    fn colliding_names_get_ordinal_suffixes() {
        let tree = quartet();
        let (set, _, _) = two_model_set(&tree);
        let names = set.parameters().names();
        assert!(names.contains(&"kappa".to_string()));
        assert!(names.contains(&"kappa_2".to_string()));
        assert!(names.contains(&"RootFreqA".to_string()));
        assert_eq!(set.parameter_index("RootFreqA").unwrap(), 0);
    }

    #[test]
    fn global_updates_reach_only_linked_models() {
        let tree = quartet();
        let (mut set, m1, m2) = two_model_set(&tree);
        let values = ParameterList::from_parameters([Parameter::unconstrained("kappa_2", 7.0)]).unwrap();
        assert_eq!(set.set_parameter_values(&values).unwrap(), vec!["kappa_2"]);
        assert_eq!(set.model(m1).unwrap().parameter_value("kappa").unwrap(), 2.0);
        assert_eq!(set.model(m2).unwrap().parameter_value("kappa").unwrap(), 7.0);
    }

    #[test]
    fn shared_parameter_updates_both_models() {
        let tree = quartet();
        let (mut set, m1, m2) = two_model_set(&tree);
        set.set_parameter_to_model("kappa", m2).unwrap();
        let values = ParameterList::from_parameters([Parameter::unconstrained("kappa", 4.0)]).unwrap();
        set.set_parameter_values(&values).unwrap();
        assert_eq!(set.model(m1).unwrap().parameter_value("kappa").unwrap(), 4.0);
        assert_eq!(set.model(m2).unwrap().parameter_value("kappa").unwrap(), 4.0);
        assert_eq!(set.nodes_with_parameter("kappa").len(), tree.branch_nodes().len());
    }

    #[test]
    fn unsetting_the_only_parameter_is_rejected_and_rolled_back() {
        let tree = quartet();
        let (mut set, m1, _) = two_model_set(&tree);
        let before = set.parameters().clone();
        let result = set.unset_parameter_to_model("kappa", m1);
        assert!(matches!(result, Err(ModelSetError::OrphanModel { .. })));
        assert_eq!(set.parameters(), &before);
        assert_eq!(set.models_with_parameter("kappa"), &[m1]);
    }

    #[test]
    fn unsetting_a_shared_parameter_keeps_the_set_consistent() {
        let tree = quartet();
        let (mut set, m1, m2) = two_model_set(&tree);
        set.set_parameter_to_model("kappa", m2).unwrap();
        set.unset_parameter_to_model("kappa", m2).unwrap();
        assert_eq!(set.models_with_parameter("kappa"), &[m1]);
        assert!(set.is_fully_set_up_for(&tree));
    }

    #[test]
    fn root_frequency_parameters_update_only_the_root() {
        let tree = quartet();
        let (mut set, m1, _) = two_model_set(&tree);
        let values = ParameterList::from_parameters([Parameter::unconstrained("RootFreqA", 0.75)]).unwrap();
        set.set_parameter_values(&values).unwrap();
        assert!((set.root_frequencies()[0] - 0.5).abs() < 1e-12);
        assert_eq!(set.model(m1).unwrap().frequencies(), &[0.25; 4]);
        assert!(set.nodes_with_parameter("RootFreqA").is_empty());
    }

    #[test]
    fn stationary_set_uses_first_model_frequencies() {
        let tree = quartet();
        let mut model = NucleotideModel::new(NucleotideModelKind::Hky85, Alphabet::Dna);
        model.set_frequencies(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        let mut set = SubstitutionModelSet::new_stationary(Alphabet::Dna);
        set.add_model(Box::new(model), &tree.branch_nodes(), &["kappa", "piA"])
            .unwrap();
        assert!(set.is_stationary());
        assert!(set.root_frequencies_parameters().is_empty());
        assert!((set.root_frequencies()[3] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn unbound_nodes_or_unused_models_are_not_fully_set_up() {
        let tree = quartet();
        let mut set = SubstitutionModelSet::new_stationary(Alphabet::Dna);
        let branches = tree.branch_nodes();
        set.add_model(k80(), &branches[..2], &["kappa"]).unwrap();
        assert!(!set.is_fully_set_up_for(&tree));
        set.add_model(hky(), &branches[2..], &["kappa"]).unwrap();
        assert!(set.is_fully_set_up_for(&tree));
        set.add_model(k80(), &[], &["kappa"]).unwrap();
        assert!(!set.is_fully_set_up_for(&tree));
    }

    #[test]
    fn unknown_local_parameter_is_rejected_atomically() {
        let mut set = SubstitutionModelSet::new_stationary(Alphabet::Dna);
        let result = set.add_model(k80(), &[1, 2], &["kappa", "omega"]);
        assert!(matches!(result, Err(ModelSetError::UnknownModelParameter { .. })));
        assert_eq!(set.number_of_models(), 0);
        assert!(set.parameters().is_empty());
    }

    #[test]
    fn alphabet_mismatch_is_rejected() {
        let mut set = SubstitutionModelSet::new_stationary(Alphabet::Rna);
        let result = set.add_model(k80(), &[1], &["kappa"]);
        assert!(matches!(result, Err(ModelSetError::AlphabetMismatch { .. })));
    }

    #[test]
    fn added_parameters_link_the_models_of_their_nodes() {
        let tree = quartet();
        let (mut set, m1, m2) = two_model_set(&tree);
        let theta = Parameter::unconstrained("kappa", 3.0);
        let global = set.add_parameter(&theta, &tree.branch_nodes()).unwrap();
        assert_eq!(global, "kappa_3");
        assert_eq!(set.models_with_parameter("kappa_3"), &[m1, m2]);
        assert_eq!(set.model(m2).unwrap().parameter_value("kappa").unwrap(), 3.0);
    }

    #[test]
    fn removing_a_model_drops_its_exclusive_parameters() {
        let tree = quartet();
        let (mut set, m1, m2) = two_model_set(&tree);
        let removed = set.remove_model(m2).unwrap();
        assert_eq!(removed.name(), "K80");
        assert!(!set.parameters().contains("kappa_2"));
        assert_eq!(set.number_of_models(), 1);
        assert_eq!(set.model_ids(), &[m1]);
        assert!(!set.is_fully_set_up_for(&tree));
    }

    #[test]
    fn replacing_a_model_keeps_associations_and_values() {
        let tree = quartet();
        let (mut set, _, m2) = two_model_set(&tree);
        let values = ParameterList::from_parameters([Parameter::unconstrained("kappa_2", 5.0)]).unwrap();
        set.set_parameter_values(&values).unwrap();
        set.set_model(hky(), m2).unwrap();
        let model = set.model(m2).unwrap();
        assert_eq!(model.name(), "HKY85");
        assert_eq!(model.parameter_value("kappa").unwrap(), 5.0);
        assert!(set.is_fully_set_up_for(&tree));
        assert_eq!(set.list_model_names().len(), 2);
    }
}
