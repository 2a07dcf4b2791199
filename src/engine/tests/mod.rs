pub mod helpers;
mod tests_reset;
mod tests_scan;
