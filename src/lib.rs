/// Translates PowerAssembler-dialect 6502 source into Commodore-style
/// object files with a 16-bit load address.
///
/// The steps are:
/// 1. **Tokenizing** - each source line becomes a token stream
/// 2. **Parsing** - tokens become an ordered statement list
/// 3. **Definition pass** - program counters are laid down, operations are
///    sized, and the symbol table is populated
/// 4. **Emission pass** - expressions are evaluated strictly and bytes are
///    written into one or more code buffers
pub mod assembler;
