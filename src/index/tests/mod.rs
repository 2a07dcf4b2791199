mod tests_recover;
