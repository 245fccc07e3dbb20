use crate::{sensors::ltr390, types::ModelId};

/// Picks the board model from primary-bus scans of models A, B and C, in
/// that order. The first primary bus answering at the LTR390 address wins;
/// with none present the board runs as the wind-only node.
pub fn detect_model<'a, I>(scans: I) -> ModelId
where
    I: IntoIterator<Item = (ModelId, &'a [u8])>,
{
    let mut found: Option<ModelId> = None;
    for (model, addresses) in scans {
        if model == ModelId::D || !addresses.contains(&ltr390::ADDRESS) {
            continue;
        }
        found = Some(match found {
            Some(current) if rank(current) <= rank(model) => current,
            _ => model,
        });
    }
    found.unwrap_or(ModelId::D)
}

fn rank(model: ModelId) -> u8 {
    match model {
        ModelId::A => 0,
        ModelId::B => 1,
        ModelId::C => 2,
        ModelId::D => 3,
    }
}
