mod helpers;
mod recover_tests;
mod rekey_tests;
mod verify_tests;
