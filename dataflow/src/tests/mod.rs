mod compile_tests;
mod support;
