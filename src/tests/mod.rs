mod fixtures;

mod query_tests;
