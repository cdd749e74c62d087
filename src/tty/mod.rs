//! TTY line discipline (component L).

pub mod line_discipline;
