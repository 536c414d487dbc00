use slotmap::new_key_type;

new_key_type! {
    /// Handle of a model owned by a [`SubstitutionModelSet`](super::SubstitutionModelSet).
    pub struct ModelId;
}
