/*
[INPUT]:  Subcommand arguments from main
[OUTPUT]: Interactive helpers for the breakhandler binary
[POS]:    CLI layer
[UPDATE]: When adding interactive subcommands
*/

pub mod init;
