// Composition layer: the decision-process seam, episode subscribers, and the
// observe -> decide -> act loop tying cameras and motion together.

pub mod control_loop;
pub mod decision;
pub mod subscriber;
