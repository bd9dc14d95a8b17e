//! Segment storage test suite
