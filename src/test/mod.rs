pub mod utils;

mod certificates;
mod courses;
mod enrollments;
mod payments;
