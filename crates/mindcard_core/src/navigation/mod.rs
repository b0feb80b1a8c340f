//! Breadcrumb navigation between nested card containers.

pub mod breadcrumb;
