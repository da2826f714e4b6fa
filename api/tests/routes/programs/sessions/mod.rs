mod lifecycle_test;
mod marking_test;
