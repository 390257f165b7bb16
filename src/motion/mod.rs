// Motion side of the bridge: joint descriptors and ordering, the
// position-map <-> vector mapper with limit enforcement, and the
// hardware seam the actions are dispatched through.

pub mod hardware;
pub mod joints;
pub mod mapper;
